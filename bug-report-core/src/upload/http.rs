use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::models::config::UploadConfig;
use crate::models::error::{TransportError, UploadError};
use crate::models::report::{ReportBundle, ReportDocument};
use crate::traits::transport::UploadTransport;

/// Body of the request that opens an upload.
#[derive(Serialize)]
struct OpenRequest<'a> {
    report: &'a ReportDocument,
    logs: &'a [String],
    content_length: u64,
    content_type: Option<&'a str>,
}

#[derive(Deserialize)]
struct OpenResponse {
    upload_id: String,
}

#[derive(Deserialize)]
struct ChunkResponse {
    received_bytes: u64,
}

#[derive(Deserialize)]
struct ConfirmResponse {
    report_id: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<String>,
    message: Option<String>,
}

/// `UploadTransport` over HTTP(S).
///
/// ```text
/// POST {endpoint}/projects/{project}/reports                     → { upload_id }
/// PUT  {endpoint}/projects/{project}/reports/uploads/{id}        → { received_bytes }
///      Content-Range: bytes {start}-{end}/{total}
/// POST {endpoint}/projects/{project}/reports/uploads/{id}/confirm → { report_id }
/// ```
pub struct HttpTransport {
    agent: ureq::Agent,
    endpoint: String,
    project_id: String,
    api_token: Option<String>,
}

impl HttpTransport {
    pub fn new(config: &UploadConfig) -> Result<Self, UploadError> {
        config.validate().map_err(UploadError::ConfigurationFailed)?;
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(10).min(config.request_timeout()))
            .timeout(config.request_timeout())
            .build();
        Ok(Self {
            agent,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            project_id: config.project_id.clone(),
            api_token: config.api_token.clone(),
        })
    }

    fn reports_url(&self) -> String {
        format!("{}/projects/{}/reports", self.endpoint, self.project_id)
    }

    fn upload_url(&self, upload_id: &str) -> String {
        format!("{}/uploads/{}", self.reports_url(), upload_id)
    }

    fn authorization(&self) -> String {
        match &self.api_token {
            Some(token) => format!("Bearer {}", token),
            None => "FormUser anonymous".to_string(),
        }
    }

    fn request(&self, method: &str, url: &str) -> ureq::Request {
        self.agent
            .request(method, url)
            .set("Authorization", &self.authorization())
            .set("Accept", "application/json")
    }
}

impl UploadTransport for HttpTransport {
    fn destination(&self) -> String {
        self.reports_url()
    }

    fn open(&self, bundle: &ReportBundle) -> Result<String, TransportError> {
        let document = bundle.document();
        let body = serde_json::to_string(&OpenRequest {
            report: document,
            logs: bundle.logs(),
            content_length: bundle.payload_size(),
            content_type: bundle.payload().map(|p| p.content_type.as_str()),
        })
        .map_err(|e| TransportError::Rejected {
            status: 0,
            reason: format!("failed to encode report: {}", e),
        })?;

        let result = self
            .request("POST", &self.reports_url())
            .set("Content-Type", "application/json")
            .send_string(&body);
        let response: OpenResponse = parse_json(read_body(result, "open upload")?, "open upload")?;
        Ok(response.upload_id)
    }

    fn send_chunk(
        &self,
        upload_id: &str,
        offset: u64,
        total: u64,
        data: &[u8],
    ) -> Result<u64, TransportError> {
        let end = offset + data.len() as u64;
        let range = format!("bytes {}-{}/{}", offset, end.saturating_sub(1), total);
        let result = self
            .request("PUT", &self.upload_url(upload_id))
            .set("Content-Type", "application/octet-stream")
            .set("Content-Range", &range)
            .send_bytes(data);
        let response: ChunkResponse = parse_json(read_body(result, "upload chunk")?, "upload chunk")?;
        Ok(response.received_bytes)
    }

    fn confirm(&self, upload_id: &str) -> Result<String, TransportError> {
        let url = format!("{}/confirm", self.upload_url(upload_id));
        let result = self
            .request("POST", &url)
            .set("Content-Type", "application/json")
            .send_string("{}");
        let response: ConfirmResponse = parse_json(read_body(result, "confirm upload")?, "confirm upload")?;
        Ok(response.report_id)
    }
}

fn read_body(result: Result<ureq::Response, ureq::Error>, what: &str) -> Result<String, TransportError> {
    match result {
        Ok(response) => response
            .into_string()
            .map_err(|e| TransportError::Transient(format!("{}: failed reading response: {}", what, e))),
        Err(ureq::Error::Status(status, response)) => {
            let body = response.into_string().unwrap_or_default();
            let error = classify_status(status, &body);
            log::warn!("{}: {}", what, error);
            Err(error)
        }
        Err(ureq::Error::Transport(err)) => Err(TransportError::Transient(format!("{}: {}", what, err))),
    }
}

fn parse_json<T: for<'de> Deserialize<'de>>(body: String, what: &str) -> Result<T, TransportError> {
    serde_json::from_str(&body).map_err(|e| TransportError::Rejected {
        status: 200,
        reason: format!("{}: malformed response: {}", what, e),
    })
}

/// Maps an HTTP error status to a retry class.
///
/// 408, 429 and 5xx are transient; every other status is a permanent
/// rejection. The reason comes from a JSON `error`/`message` field when the
/// body has one.
pub fn classify_status(status: u16, body: &str) -> TransportError {
    let reason = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.error.or(b.message))
        .unwrap_or_else(|| {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                format!("HTTP {}", status)
            } else {
                trimmed.chars().take(200).collect()
            }
        });

    match status {
        408 | 429 | 500..=599 => TransportError::Transient(format!("HTTP {}: {}", status, reason)),
        _ => TransportError::Rejected { status, reason },
    }
}
