use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::db::{lock, parse_col, parse_json, parse_ts, stored, ts, SharedConnection};
use crate::error::{FieldError, Result, SchedulerError};
use crate::types::{ExportDefinition, ReportTemplate, ResolvedParams, TemplateInput};

const TEMPLATE_COLUMNS: &str =
    "id, name, report_type, format, sections, is_default, usage_count, created_at";

/// Persisted report templates.
#[derive(Clone)]
pub struct TemplateStore {
    conn: SharedConnection,
}

impl TemplateStore {
    pub fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }

    #[instrument(skip(self, input))]
    pub fn create(&self, input: TemplateInput, now: DateTime<Utc>) -> Result<ReportTemplate> {
        let mut fields = Vec::new();
        let name = match input.name.as_deref().map(str::trim) {
            None => {
                fields.push(FieldError::missing("name"));
                None
            }
            Some("") => {
                fields.push(FieldError::invalid("name", "must not be empty"));
                None
            }
            Some(n) => Some(n.to_string()),
        };
        if input.report_type.is_none() {
            fields.push(FieldError::missing("type"));
        }
        if input.format.is_none() {
            fields.push(FieldError::missing("format"));
        }
        if input.sections.iter().any(|s| s.trim().is_empty()) {
            fields.push(FieldError::invalid("sections", "entries must not be empty"));
        }
        let (Some(name), Some(report_type), Some(format), true) =
            (name, input.report_type, input.format, fields.is_empty())
        else {
            return Err(SchedulerError::Validation { fields });
        };

        let template = ReportTemplate {
            id: Uuid::now_v7().to_string(),
            name,
            report_type,
            format,
            sections: input.sections,
            is_default: input.is_default,
            usage_count: 0,
            created_at: stored(now),
        };

        let conn = lock(&self.conn)?;
        conn.execute(
            "INSERT INTO report_templates
             (id, name, report_type, format, sections, is_default, usage_count, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)",
            rusqlite::params![
                template.id,
                template.name,
                template.report_type.to_string(),
                template.format.to_string(),
                serde_json::to_string(&template.sections)?,
                template.is_default,
                ts(&template.created_at),
            ],
        )?;
        info!(template_id = %template.id, name = %template.name, "template created");
        Ok(template)
    }

    pub fn get(&self, id: &str) -> Result<ReportTemplate> {
        let conn = lock(&self.conn)?;
        conn.query_row(
            &format!("SELECT {TEMPLATE_COLUMNS} FROM report_templates WHERE id = ?1"),
            [id],
            row_to_template,
        )
        .optional()?
        .ok_or_else(|| SchedulerError::TemplateNotFound { id: id.to_string() })
    }

    /// Default templates first, then by name.
    pub fn list(&self) -> Result<Vec<ReportTemplate>> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {TEMPLATE_COLUMNS} FROM report_templates ORDER BY is_default DESC, name"
        ))?;
        let templates = stmt
            .query_map([], row_to_template)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(templates)
    }

    /// Bump `usage_count` by one.
    pub fn increment_usage(&self, id: &str) -> Result<()> {
        let conn = lock(&self.conn)?;
        let n = conn.execute(
            "UPDATE report_templates SET usage_count = usage_count + 1 WHERE id = ?1",
            [id],
        )?;
        if n == 0 {
            return Err(SchedulerError::TemplateNotFound { id: id.to_string() });
        }
        Ok(())
    }
}

fn row_to_template(row: &rusqlite::Row<'_>) -> rusqlite::Result<ReportTemplate> {
    Ok(ReportTemplate {
        id: row.get(0)?,
        name: row.get(1)?,
        report_type: parse_col(2, &row.get::<_, String>(2)?)?,
        format: parse_col(3, &row.get::<_, String>(3)?)?,
        sections: parse_json(4, &row.get::<_, String>(4)?)?,
        is_default: row.get(5)?,
        usage_count: row.get::<_, i64>(6)?.max(0) as u64,
        created_at: parse_ts(7, &row.get::<_, String>(7)?)?,
    })
}

/// Fills in generator parameters from a definition's optional template.
#[derive(Clone)]
pub struct TemplateResolver {
    templates: TemplateStore,
}

impl TemplateResolver {
    pub fn new(templates: TemplateStore) -> Self {
        Self { templates }
    }

    pub fn templates(&self) -> &TemplateStore {
        &self.templates
    }

    /// Without a template the definition's own type and format are used.
    /// With one, the template's type, format and sections win over the
    /// definition's stored copies.
    pub fn resolve(&self, definition: &ExportDefinition) -> Result<ResolvedParams> {
        let Some(ref template_id) = definition.template_id else {
            return Ok(ResolvedParams {
                report_type: definition.report_type,
                format: definition.format,
                sections: None,
                template_id: None,
            });
        };

        let template = self.templates.get(template_id)?;
        if template.format != definition.format || template.report_type != definition.report_type
        {
            debug!(
                definition_id = %definition.id,
                template_id = %template.id,
                "stored type/format differ from template; using template"
            );
        }
        Ok(ResolvedParams {
            report_type: template.report_type,
            format: template.format,
            sections: Some(template.sections),
            template_id: Some(template.id),
        })
    }

    /// Called once per successful generation, independent of recipient count.
    pub fn record_usage(&self, template_id: &str) -> Result<()> {
        self.templates.increment_usage(template_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_shared;
    use chrono::TimeZone;
    use reportline_core::{ExportFormat, Frequency, ReportType};
    use rusqlite::Connection;

    fn store() -> TemplateStore {
        TemplateStore::new(open_shared(Connection::open_in_memory().unwrap()).unwrap())
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 0, 0, 0).unwrap()
    }

    fn definition(template_id: Option<String>) -> ExportDefinition {
        ExportDefinition {
            id: "d-1".to_string(),
            name: "Monthly".to_string(),
            report_type: ReportType::Monthly,
            frequency: Frequency::Monthly,
            format: ExportFormat::Csv,
            destination: "finance@example.com".to_string(),
            recipients: Vec::new(),
            template_id,
            is_active: true,
            last_run: None,
            next_run: now(),
            run_count: 0,
            consecutive_failures: 0,
            last_error: None,
            created_at: now(),
            updated_at: now(),
        }
    }

    fn input() -> TemplateInput {
        TemplateInput {
            name: Some("Board pack".to_string()),
            report_type: Some(ReportType::Portfolio),
            format: Some(ExportFormat::Pdf),
            sections: vec!["summary".to_string(), "holdings".to_string()],
            is_default: false,
        }
    }

    #[test]
    fn create_validates_all_fields() {
        let err = store().create(TemplateInput::default(), now()).unwrap_err();
        let SchedulerError::Validation { fields } = err else {
            panic!("expected validation error");
        };
        let names: Vec<_> = fields.iter().map(|f| f.field).collect();
        assert_eq!(names, vec!["name", "type", "format"]);
    }

    #[test]
    fn created_template_matches_stored_row() {
        let store = store();
        let t = store
            .create(input(), now() + chrono::Duration::nanoseconds(987_654_321))
            .unwrap();
        assert_eq!(store.get(&t.id).unwrap(), t);
    }

    #[test]
    fn list_puts_defaults_first() {
        let store = store();
        store.create(input(), now()).unwrap();
        let mut default = input();
        default.name = Some("Zeta default".to_string());
        default.is_default = true;
        store.create(default, now()).unwrap();

        let names: Vec<_> = store.list().unwrap().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["Zeta default", "Board pack"]);
    }

    #[test]
    fn resolve_without_template_uses_definition_fields() {
        let resolver = TemplateResolver::new(store());
        let params = resolver.resolve(&definition(None)).unwrap();
        assert_eq!(params.format, ExportFormat::Csv);
        assert_eq!(params.report_type, ReportType::Monthly);
        assert!(params.sections.is_none());
        assert!(params.template_id.is_none());
    }

    #[test]
    fn resolve_with_template_prefers_template_values() {
        let templates = store();
        let t = templates.create(input(), now()).unwrap();
        let resolver = TemplateResolver::new(templates);

        let params = resolver.resolve(&definition(Some(t.id.clone()))).unwrap();
        assert_eq!(params.format, ExportFormat::Pdf);
        assert_eq!(params.report_type, ReportType::Portfolio);
        assert_eq!(params.sections.as_deref(), Some(&t.sections[..]));
        assert_eq!(params.template_id.as_deref(), Some(t.id.as_str()));
    }

    #[test]
    fn resolve_with_missing_template_fails() {
        let resolver = TemplateResolver::new(store());
        let err = resolver
            .resolve(&definition(Some("gone".to_string())))
            .unwrap_err();
        assert!(matches!(err, SchedulerError::TemplateNotFound { .. }));
    }

    #[test]
    fn record_usage_increments_by_one() {
        let templates = store();
        let t = templates.create(input(), now()).unwrap();
        let resolver = TemplateResolver::new(templates.clone());

        resolver.record_usage(&t.id).unwrap();
        resolver.record_usage(&t.id).unwrap();
        assert_eq!(templates.get(&t.id).unwrap().usage_count, 2);
    }
}
