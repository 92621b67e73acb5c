//! HTTP client for the external report renderer.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reportline_core::{config::GeneratorConfig, Artifact};
use reportline_scheduler::{GenerationRequest, GeneratorError, ReportGenerator};
use reqwest::header::CONTENT_DISPOSITION;
use tracing::debug;

/// Calls `POST {base_url}/render`; a 2xx body is the artifact.
pub struct HttpReportGenerator {
    client: reqwest::Client,
    render_url: String,
    api_key: Option<String>,
}

impl HttpReportGenerator {
    pub fn new(config: &GeneratorConfig, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            render_url: format!("{}/render", config.base_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl ReportGenerator for HttpReportGenerator {
    fn name(&self) -> &str {
        "http"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Artifact, GeneratorError> {
        let mut req = self.client.post(&self.render_url).json(request);
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| GeneratorError::Unavailable(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            let msg = format!("renderer returned {status}: {}", detail.trim());
            return Err(if status.is_client_error() {
                GeneratorError::Rejected(msg)
            } else {
                GeneratorError::Unavailable(msg)
            });
        }

        let file_name = resp
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(disposition_file_name)
            .unwrap_or_else(|| {
                Artifact::default_file_name(&request.name, request.format, request.trigger_at)
            });

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| GeneratorError::Unavailable(format!("reading artifact: {e}")))?;
        if bytes.is_empty() {
            return Err(GeneratorError::Rejected("renderer returned an empty body".to_string()));
        }

        debug!(
            definition_id = %request.definition_id,
            %file_name,
            size = bytes.len(),
            "artifact received"
        );
        Ok(Artifact::new(file_name, request.format, bytes.to_vec(), Utc::now()))
    }
}

/// Extract a bare file name from a `Content-Disposition` value.
///
/// Directory components are stripped so the renderer cannot steer where a
/// path destination writes.
fn disposition_file_name(header: &str) -> Option<String> {
    let raw = header.split(';').map(str::trim).find_map(|part| {
        let (key, value) = part.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("filename")
            .then(|| value.trim().trim_matches('"'))
    })?;

    let name = raw.rsplit(['/', '\\']).next()?.trim();
    if name.is_empty() || name == "." || name == ".." {
        None
    } else {
        Some(name.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        http::{header, StatusCode},
        routing::post,
        Json, Router,
    };
    use chrono::TimeZone;
    use reportline_core::{config::GeneratorConfig, ExportFormat, ReportType};

    #[test]
    fn file_name_from_disposition() {
        assert_eq!(
            disposition_file_name(r#"attachment; filename="q1.pdf""#).as_deref(),
            Some("q1.pdf")
        );
        assert_eq!(
            disposition_file_name("attachment; FILENAME=report.csv").as_deref(),
            Some("report.csv")
        );
        assert_eq!(
            disposition_file_name(r#"attachment; filename="../../etc/passwd""#).as_deref(),
            Some("passwd")
        );
        assert_eq!(disposition_file_name("inline"), None);
        assert_eq!(disposition_file_name(r#"attachment; filename="..""#), None);
    }

    fn request() -> GenerationRequest {
        GenerationRequest {
            definition_id: "d-1".to_string(),
            name: "Monthly Close".to_string(),
            report_type: ReportType::Monthly,
            format: ExportFormat::Csv,
            sections: None,
            trigger_at: Utc.with_ymd_and_hms(2025, 2, 15, 0, 0, 0).unwrap(),
        }
    }

    async fn serve(router: Router) -> GeneratorConfig {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
        GeneratorConfig {
            base_url: format!("http://{addr}/"),
            api_key: Some("secret".to_string()),
        }
    }

    #[tokio::test]
    async fn renders_artifact_from_response_body() {
        let router = Router::new().route(
            "/render",
            post(
                |headers: axum::http::HeaderMap, Json(body): Json<serde_json::Value>| async move {
                    assert_eq!(headers[header::AUTHORIZATION], "Bearer secret");
                    assert_eq!(body["reportType"], "monthly");
                    assert_eq!(body["format"], "CSV");
                    "a,b\n1,2\n"
                },
            ),
        );
        let cfg = serve(router).await;
        let generator = HttpReportGenerator::new(&cfg, Duration::from_secs(5)).unwrap();

        let artifact = generator.generate(&request()).await.unwrap();
        assert_eq!(artifact.bytes, b"a,b\n1,2\n");
        assert_eq!(artifact.file_name, "monthly-close-2025-02-15.csv");
        assert_eq!(artifact.format, ExportFormat::Csv);
    }

    #[tokio::test]
    async fn client_errors_are_rejections() {
        let router = Router::new().route(
            "/render",
            post(|| async { (StatusCode::BAD_REQUEST, "unknown section") }),
        );
        let cfg = serve(router).await;
        let generator = HttpReportGenerator::new(&cfg, Duration::from_secs(5)).unwrap();

        let err = generator.generate(&request()).await.unwrap_err();
        assert!(matches!(err, GeneratorError::Rejected(ref m) if m.contains("unknown section")));
    }
}
