use chrono::{DateTime, Utc};
use reportline_core::{ExportFormat, Frequency, ReportType};
use reportline_delivery::{is_valid_email, Destination};
use rusqlite::{Connection, OptionalExtension};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::db::{lock, parse_col, parse_json, parse_ts, stored, ts, SharedConnection};
use crate::error::{FieldError, Result, SchedulerError};
use crate::recurrence::next_trigger;
use crate::types::{
    DefinitionInput, ExportDefinition, RunCompletion, RunOutcome, RunRecord, RunStatus,
};

const DEFINITION_COLUMNS: &str = "id, name, report_type, frequency, format, destination, \
     recipients, template_id, is_active, last_run, next_run, run_count, \
     consecutive_failures, last_error, created_at, updated_at";

const RUN_COLUMNS: &str = "id, definition_id, trigger_at, finished_at, status, error, \
     delivery, artifact_size, artifact_sha256";

/// Durable collection of export definitions and their run log.
///
/// `last_run`, `next_run` and `run_count` change only through
/// [`record_run_start`](Self::record_run_start) and
/// [`record_run_outcome`](Self::record_run_outcome); create/update never
/// accept them from the caller.
#[derive(Clone)]
pub struct ScheduleStore {
    conn: SharedConnection,
}

/// A [`DefinitionInput`] that passed syntactic validation.
struct ValidInput {
    name: String,
    report_type: Option<ReportType>,
    frequency: Frequency,
    format: Option<ExportFormat>,
    destination: String,
    recipients: Vec<String>,
    template_id: Option<String>,
    is_active: Option<bool>,
}

impl ScheduleStore {
    pub fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }

    /// Validate and insert a new definition. `next_run` is computed from
    /// `now` (the creation time).
    #[instrument(skip(self, input))]
    pub fn create(&self, input: DefinitionInput, now: DateTime<Utc>) -> Result<ExportDefinition> {
        let valid = validate(input)?;
        let now = stored(now);
        let conn = lock(&self.conn)?;
        let (report_type, format) = fill_from_template(&conn, &valid)?;

        let def = ExportDefinition {
            id: Uuid::now_v7().to_string(),
            name: valid.name,
            report_type,
            frequency: valid.frequency,
            format,
            destination: valid.destination,
            recipients: valid.recipients,
            template_id: valid.template_id,
            is_active: valid.is_active.unwrap_or(true),
            last_run: None,
            next_run: next_trigger(now, valid.frequency)?,
            run_count: 0,
            consecutive_failures: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        };

        conn.execute(
            "INSERT INTO export_definitions
             (id, name, report_type, frequency, format, destination, recipients,
              template_id, is_active, last_run, next_run, run_count,
              consecutive_failures, last_error, created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,NULL,?10,0,0,NULL,?11,?11)",
            rusqlite::params![
                def.id,
                def.name,
                def.report_type.to_string(),
                def.frequency.to_string(),
                def.format.to_string(),
                def.destination,
                serde_json::to_string(&def.recipients)?,
                def.template_id,
                def.is_active,
                ts(&def.next_run),
                ts(&def.created_at),
            ],
        )?;

        info!(
            definition_id = %def.id,
            name = %def.name,
            next_run = %def.next_run,
            "export definition created"
        );
        Ok(def)
    }

    /// Replace the editable fields of a definition.
    ///
    /// A frequency change recomputes `next_run` from the current anchor
    /// (last run, else creation time); otherwise `next_run` is kept.
    #[instrument(skip(self, input))]
    pub fn update(
        &self,
        id: &str,
        input: DefinitionInput,
        now: DateTime<Utc>,
    ) -> Result<ExportDefinition> {
        let valid = validate(input)?;
        let conn = lock(&self.conn)?;
        let current = get_definition(&conn, id)?;
        let (report_type, format) = fill_from_template(&conn, &valid)?;

        let next_run = if valid.frequency != current.frequency {
            next_trigger(current.anchor(), valid.frequency)?
        } else {
            current.next_run
        };

        let updated = ExportDefinition {
            name: valid.name,
            report_type,
            frequency: valid.frequency,
            format,
            destination: valid.destination,
            recipients: valid.recipients,
            template_id: valid.template_id,
            is_active: valid.is_active.unwrap_or(current.is_active),
            next_run,
            updated_at: stored(now),
            ..current
        };

        conn.execute(
            "UPDATE export_definitions
             SET name=?1, report_type=?2, frequency=?3, format=?4, destination=?5,
                 recipients=?6, template_id=?7, is_active=?8, next_run=?9, updated_at=?10
             WHERE id=?11",
            rusqlite::params![
                updated.name,
                updated.report_type.to_string(),
                updated.frequency.to_string(),
                updated.format.to_string(),
                updated.destination,
                serde_json::to_string(&updated.recipients)?,
                updated.template_id,
                updated.is_active,
                ts(&updated.next_run),
                ts(&updated.updated_at),
                updated.id,
            ],
        )?;

        info!(definition_id = %id, "export definition updated");
        Ok(updated)
    }

    /// Flip `is_active` in a single statement.
    pub fn toggle_active(&self, id: &str, now: DateTime<Utc>) -> Result<ExportDefinition> {
        let conn = lock(&self.conn)?;
        let n = conn.execute(
            "UPDATE export_definitions SET is_active = 1 - is_active, updated_at=?1 WHERE id=?2",
            rusqlite::params![ts(&now), id],
        )?;
        if n == 0 {
            return Err(SchedulerError::DefinitionNotFound { id: id.to_string() });
        }
        let def = get_definition(&conn, id)?;
        info!(definition_id = %id, active = def.is_active, "export definition toggled");
        Ok(def)
    }

    /// Remove a definition and its run log.
    ///
    /// Callers must hold the definition's run slot; see
    /// [`ExecutionEngine::delete_definition`](crate::engine::ExecutionEngine::delete_definition).
    pub fn delete(&self, id: &str) -> Result<()> {
        let mut conn = lock(&self.conn)?;
        let tx = conn.transaction()?;
        let n = tx.execute("DELETE FROM export_definitions WHERE id = ?1", [id])?;
        if n == 0 {
            return Err(SchedulerError::DefinitionNotFound { id: id.to_string() });
        }
        tx.execute("DELETE FROM export_runs WHERE definition_id = ?1", [id])?;
        tx.commit()?;
        info!(definition_id = %id, "export definition deleted");
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<ExportDefinition> {
        let conn = lock(&self.conn)?;
        get_definition(&conn, id)
    }

    /// Return all definitions ordered by creation time.
    pub fn list(&self) -> Result<Vec<ExportDefinition>> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {DEFINITION_COLUMNS} FROM export_definitions ORDER BY created_at, id"
        ))?;
        let defs = stmt
            .query_map([], row_to_definition)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(defs)
    }

    /// Active definitions whose `next_run` has arrived, earliest first.
    pub fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<ExportDefinition>> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {DEFINITION_COLUMNS} FROM export_definitions
             WHERE is_active = 1 AND next_run <= ?1
             ORDER BY next_run"
        ))?;
        let defs = stmt
            .query_map([ts(&now)], row_to_definition)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(defs)
    }

    /// Open a run log entry in status `running`. Returns the run id.
    #[instrument(skip(self))]
    pub fn record_run_start(&self, id: &str, trigger_at: DateTime<Utc>) -> Result<String> {
        let conn = lock(&self.conn)?;
        let exists: Option<String> = conn
            .query_row(
                "SELECT id FROM export_definitions WHERE id = ?1",
                [id],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(SchedulerError::DefinitionNotFound { id: id.to_string() });
        }

        let run_id = Uuid::now_v7().to_string();
        conn.execute(
            "INSERT INTO export_runs (id, definition_id, trigger_at, status)
             VALUES (?1, ?2, ?3, 'running')",
            rusqlite::params![run_id, id, ts(&trigger_at)],
        )?;
        Ok(run_id)
    }

    /// Apply a run's outcome as one transaction.
    ///
    /// `last_run` becomes `trigger_at` and `next_run` is recomputed from it
    /// whatever the outcome, so a failing definition waits a full period
    /// before the next attempt. `run_count` grows only on success. When
    /// `pause_after` is set and the failure streak reaches it, the
    /// definition is deactivated in the same transaction.
    #[instrument(skip(self, outcome), fields(status = %outcome.status))]
    pub fn record_run_outcome(
        &self,
        id: &str,
        run_id: &str,
        outcome: &RunOutcome,
        trigger_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        pause_after: Option<u32>,
    ) -> Result<RunCompletion> {
        let mut conn = lock(&self.conn)?;
        let tx = conn.transaction()?;

        let (frequency, streak): (Frequency, u32) = tx
            .query_row(
                "SELECT frequency, consecutive_failures FROM export_definitions WHERE id = ?1",
                [id],
                |row| Ok((parse_col(0, &row.get::<_, String>(0)?)?, row.get(1)?)),
            )
            .optional()?
            .ok_or_else(|| SchedulerError::DefinitionNotFound { id: id.to_string() })?;

        let next_run = next_trigger(trigger_at, frequency)?;

        if outcome.is_success() {
            tx.execute(
                "UPDATE export_definitions
                 SET last_run=?1, next_run=?2, run_count=run_count+1,
                     consecutive_failures=0, last_error=NULL, updated_at=?3
                 WHERE id=?4",
                rusqlite::params![ts(&trigger_at), ts(&next_run), ts(&finished_at), id],
            )?;
        } else {
            let streak = streak.saturating_add(1);
            let pause = pause_after.is_some_and(|limit| streak >= limit);
            tx.execute(
                "UPDATE export_definitions
                 SET last_run=?1, next_run=?2, consecutive_failures=?3, last_error=?4,
                     is_active = CASE WHEN ?5 THEN 0 ELSE is_active END,
                     updated_at=?6
                 WHERE id=?7",
                rusqlite::params![
                    ts(&trigger_at),
                    ts(&next_run),
                    streak,
                    outcome.error,
                    pause,
                    ts(&finished_at),
                    id
                ],
            )?;
            if pause {
                warn!(
                    definition_id = %id,
                    streak,
                    "export definition paused after repeated failures"
                );
            }
        }

        close_run(&tx, id, run_id, outcome, finished_at)?;

        let definition = get_definition(&tx, id)?;
        let run = get_run(&tx, run_id)?;
        tx.commit()?;
        Ok(RunCompletion { definition, run })
    }

    /// Close an open run record without touching its definition.
    pub fn close_run(
        &self,
        id: &str,
        run_id: &str,
        outcome: &RunOutcome,
        finished_at: DateTime<Utc>,
    ) -> Result<RunRecord> {
        let conn = lock(&self.conn)?;
        close_run(&conn, id, run_id, outcome, finished_at)?;
        get_run(&conn, run_id)
    }

    /// Most recent runs of a definition, newest first.
    pub fn runs_for(&self, id: &str, limit: usize) -> Result<Vec<RunRecord>> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {RUN_COLUMNS} FROM export_runs
             WHERE definition_id = ?1
             ORDER BY trigger_at DESC, id DESC
             LIMIT ?2"
        ))?;
        let runs = stmt
            .query_map(rusqlite::params![id, limit as i64], row_to_run)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(runs)
    }

    /// Runs still marked `running`, i.e. left open by a previous process.
    pub fn interrupted_runs(&self) -> Result<Vec<RunRecord>> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {RUN_COLUMNS} FROM export_runs WHERE status = 'running' ORDER BY trigger_at"
        ))?;
        let runs = stmt
            .query_map([], row_to_run)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(runs)
    }
}

// --- private helpers -------------------------------------------------------

/// Syntactic checks that need no database access. Collects every problem
/// before failing.
fn validate(input: DefinitionInput) -> Result<ValidInput> {
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

    let template_id = match input.template_id.as_deref().map(str::trim) {
        Some("") => {
            fields.push(FieldError::invalid("templateId", "must not be empty"));
            None
        }
        other => other.map(String::from),
    };

    // Type and format may come from the template instead.
    if input.template_id.is_none() {
        if input.report_type.is_none() {
            fields.push(FieldError::missing("reportType"));
        }
        if input.format.is_none() {
            fields.push(FieldError::missing("format"));
        }
    }

    if input.frequency.is_none() {
        fields.push(FieldError::missing("frequency"));
    }

    let destination = match input.destination.as_deref().map(str::trim) {
        None | Some("") => {
            fields.push(FieldError::missing("destination"));
            None
        }
        Some(d) => match Destination::parse(d) {
            Ok(_) => Some(d.to_string()),
            Err(e) => {
                fields.push(FieldError::invalid("destination", e.to_string()));
                None
            }
        },
    };

    let recipients: Vec<String> = input.recipients.iter().map(|r| r.trim().to_string()).collect();
    for (i, r) in recipients.iter().enumerate() {
        if !is_valid_email(r) {
            fields.push(FieldError::invalid(
                "recipients",
                format!("entry {i} ({r:?}) is not a valid email address"),
            ));
        }
    }

    let (Some(name), Some(frequency), Some(destination), true) =
        (name, input.frequency, destination, fields.is_empty())
    else {
        return Err(SchedulerError::Validation { fields });
    };

    Ok(ValidInput {
        name,
        report_type: input.report_type,
        frequency,
        format: input.format,
        destination,
        recipients,
        template_id,
        is_active: input.is_active,
    })
}

/// Resolve the stored (preview) type and format. With a template, any value
/// the caller omitted is copied from it.
fn fill_from_template(conn: &Connection, valid: &ValidInput) -> Result<(ReportType, ExportFormat)> {
    let Some(ref template_id) = valid.template_id else {
        // validate() guarantees both are present without a template.
        return match (valid.report_type, valid.format) {
            (Some(t), Some(f)) => Ok((t, f)),
            _ => Err(SchedulerError::Internal(
                "type/format missing after validation".to_string(),
            )),
        };
    };

    let (t, f): (ReportType, ExportFormat) = conn
        .query_row(
            "SELECT report_type, format FROM report_templates WHERE id = ?1",
            [template_id],
            |row| {
                Ok((
                    parse_col(0, &row.get::<_, String>(0)?)?,
                    parse_col(1, &row.get::<_, String>(1)?)?,
                ))
            },
        )
        .optional()?
        .ok_or_else(|| SchedulerError::TemplateNotFound {
            id: template_id.clone(),
        })?;

    Ok((valid.report_type.unwrap_or(t), valid.format.unwrap_or(f)))
}

fn close_run(
    conn: &Connection,
    id: &str,
    run_id: &str,
    outcome: &RunOutcome,
    finished_at: DateTime<Utc>,
) -> Result<()> {
    let closed = conn.execute(
        "UPDATE export_runs
         SET finished_at=?1, status=?2, error=?3, delivery=?4,
             artifact_size=?5, artifact_sha256=?6
         WHERE id=?7 AND definition_id=?8 AND status='running'",
        rusqlite::params![
            ts(&finished_at),
            outcome.status.to_string(),
            outcome.error,
            outcome.delivery,
            outcome.artifact.as_ref().map(|a| a.size as i64),
            outcome.artifact.as_ref().map(|a| a.sha256.clone()),
            run_id,
            id,
        ],
    )?;
    if closed == 0 {
        return Err(SchedulerError::Internal(format!(
            "run {run_id} is not open for definition {id}"
        )));
    }
    Ok(())
}

fn get_definition(conn: &Connection, id: &str) -> Result<ExportDefinition> {
    conn.query_row(
        &format!("SELECT {DEFINITION_COLUMNS} FROM export_definitions WHERE id = ?1"),
        [id],
        row_to_definition,
    )
    .optional()?
    .ok_or_else(|| SchedulerError::DefinitionNotFound { id: id.to_string() })
}

fn get_run(conn: &Connection, run_id: &str) -> Result<RunRecord> {
    let run = conn.query_row(
        &format!("SELECT {RUN_COLUMNS} FROM export_runs WHERE id = ?1"),
        [run_id],
        row_to_run,
    )?;
    Ok(run)
}

fn row_to_definition(row: &rusqlite::Row<'_>) -> rusqlite::Result<ExportDefinition> {
    Ok(ExportDefinition {
        id: row.get(0)?,
        name: row.get(1)?,
        report_type: parse_col(2, &row.get::<_, String>(2)?)?,
        frequency: parse_col(3, &row.get::<_, String>(3)?)?,
        format: parse_col(4, &row.get::<_, String>(4)?)?,
        destination: row.get(5)?,
        recipients: parse_json(6, &row.get::<_, String>(6)?)?,
        template_id: row.get(7)?,
        is_active: row.get(8)?,
        last_run: row
            .get::<_, Option<String>>(9)?
            .map(|s| parse_ts(9, &s))
            .transpose()?,
        next_run: parse_ts(10, &row.get::<_, String>(10)?)?,
        run_count: row.get(11)?,
        consecutive_failures: row.get(12)?,
        last_error: row.get(13)?,
        created_at: parse_ts(14, &row.get::<_, String>(14)?)?,
        updated_at: parse_ts(15, &row.get::<_, String>(15)?)?,
    })
}

fn row_to_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<RunRecord> {
    let status: RunStatus = parse_col(4, &row.get::<_, String>(4)?)?;
    Ok(RunRecord {
        id: row.get(0)?,
        definition_id: row.get(1)?,
        trigger_at: parse_ts(2, &row.get::<_, String>(2)?)?,
        finished_at: row
            .get::<_, Option<String>>(3)?
            .map(|s| parse_ts(3, &s))
            .transpose()?,
        status,
        error: row.get(5)?,
        delivery: row.get(6)?,
        artifact_size: row.get::<_, Option<i64>>(7)?.map(|n| n.max(0) as u64),
        artifact_sha256: row.get(8)?,
    })
}
