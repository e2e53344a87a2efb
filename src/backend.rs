use crate::config::ReviewConfig;
use crate::coords::FractionalBBox;
use crate::error::{ReviewError, ReviewResult};
use crate::models::LearnedLayoutParams;
use crate::types::{lenient_fields, CandidateSet, RecordType, TableExtraction};
use reqwest::blocking::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

pub type JobId = i64;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReextractRequest {
    pub record_index: usize,
    pub bbox: FractionalBBox,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmedRecordPayload {
    pub source_row_index: i64,
    pub bbox: FractionalBBox,
    pub was_adjusted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LearnRequest {
    pub confirmed_records: Vec<ConfirmedRecordPayload>,
    pub rejected_row_indices: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectRowRequest {
    pub row_index: i64,
    pub record_type: RecordType,
    pub table_extraction: TableExtraction,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeRequest {
    pub confirmed_indices: Vec<usize>,
    pub rejected_indices: Vec<usize>,
    pub learned_params: Option<LearnedLayoutParams>,
    pub save_as_template: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_name: Option<String>,
}

/// Responses carry a `success` flag; a false flag is a failure like any HTTP error.
pub trait RemoteOutcome {
    fn succeeded(&self) -> bool;
}

macro_rules! remote_outcome {
    ($($t:ty),*) => {
        $(impl RemoteOutcome for $t {
            fn succeeded(&self) -> bool {
                self.success
            }
        })*
    };
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoExtractResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub record_candidates: Option<CandidateSet>,
    #[serde(default)]
    pub table_extraction: Option<TableExtraction>,
    #[serde(default)]
    pub cached: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReextractResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default, deserialize_with = "lenient_fields::deserialize")]
    pub fields: BTreeMap<String, String>,
    #[serde(default)]
    pub token_count: usize,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearnResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub learned_params: Option<LearnedLayoutParams>,
    #[serde(default)]
    pub table_extraction: Option<TableExtraction>,
    #[serde(default)]
    pub record_candidates: Option<CandidateSet>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectRowResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub record_candidates: Option<CandidateSet>,
    #[serde(default)]
    pub table_extraction: Option<TableExtraction>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeResponse {
    #[serde(default)]
    pub success: bool,
    /// Persisted records as the service returns them; opaque here.
    #[serde(default)]
    pub record_candidates: Option<Value>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub template_id: Option<String>,
}

remote_outcome!(AutoExtractResponse, ReextractResponse, LearnResponse, RejectRowResponse, FinalizeResponse);

fn string_or_number<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::String(s)) if !s.is_empty() => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

pub trait ReviewBackend: Send + Sync {
    fn auto_extract(&self, job_id: JobId) -> ReviewResult<AutoExtractResponse>;

    fn reextract_row(&self, job_id: JobId, request: &ReextractRequest) -> ReviewResult<ReextractResponse>;

    fn learn_from_confirmations(&self, job_id: JobId, request: &LearnRequest) -> ReviewResult<LearnResponse>;

    fn reject_row(&self, job_id: JobId, request: &RejectRowRequest) -> ReviewResult<RejectRowResponse>;

    fn finalize_review(&self, job_id: JobId, request: &FinalizeRequest) -> ReviewResult<FinalizeResponse>;
}

/// JSON-over-HTTP client for the church OCR job routes.
#[derive(Debug, Clone)]
pub struct HttpReviewBackend {
    base_url: String,
    church_id: i64,
    token: Option<String>,
    timeout: Duration,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<String>,
    message: Option<String>,
}

impl HttpReviewBackend {
    pub fn new(base_url: &str, church_id: i64) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            church_id,
            token: None,
            timeout: Duration::from_secs(120),
        }
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn from_config(config: &ReviewConfig) -> ReviewResult<Self> {
        let url = config
            .api_url
            .as_deref()
            .ok_or_else(|| ReviewError::Config("RECORD_REVIEW_API_URL not set".to_string()))?;
        let church_id = config
            .church_id
            .ok_or_else(|| ReviewError::Config("RECORD_REVIEW_CHURCH_ID not set".to_string()))?;
        Ok(Self::new(url, church_id)
            .with_token(config.api_token.clone())
            .with_timeout(config.timeout))
    }

    pub fn endpoint(&self, job_id: JobId, action: &str) -> String {
        format!(
            "{}/api/church/{}/ocr/jobs/{}/{}",
            self.base_url, self.church_id, job_id, action
        )
    }

    fn post<Req, Resp>(&self, operation: &'static str, job_id: JobId, body: &Req) -> ReviewResult<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned + RemoteOutcome,
    {
        let url = self.endpoint(job_id, operation);
        let client = Client::builder().timeout(self.timeout).build()?;
        let mut request = client.post(&url).json(body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        tracing::debug!(operation, job_id, "calling extraction service");
        let response = request.send()?;
        let status = response.status();
        let text = response.text()?;
        if !status.is_success() {
            return Err(ReviewError::remote(operation, describe_failure(status.as_u16(), &text)));
        }
        parse_outcome(operation, &text)
    }
}

fn describe_failure(status: u16, body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody {
            error: Some(error),
            message: Some(message),
        }) => format!("{} ({}): {}", error, status, message),
        Ok(ErrorBody {
            error: Some(error), ..
        }) => format!("{} ({})", error, status),
        _ if body.trim().is_empty() => format!("HTTP {}", status),
        _ => format!("HTTP {}: {}", status, body.trim()),
    }
}

fn parse_outcome<Resp: DeserializeOwned + RemoteOutcome>(operation: &'static str, text: &str) -> ReviewResult<Resp> {
    let parsed: Resp = serde_json::from_str(text)?;
    if parsed.succeeded() {
        Ok(parsed)
    } else {
        Err(ReviewError::remote(operation, "service reported failure"))
    }
}

impl ReviewBackend for HttpReviewBackend {
    fn auto_extract(&self, job_id: JobId) -> ReviewResult<AutoExtractResponse> {
        self.post("auto-extract", job_id, &serde_json::json!({}))
    }

    fn reextract_row(&self, job_id: JobId, request: &ReextractRequest) -> ReviewResult<ReextractResponse> {
        self.post("reextract-row", job_id, request)
    }

    fn learn_from_confirmations(&self, job_id: JobId, request: &LearnRequest) -> ReviewResult<LearnResponse> {
        self.post("learn-from-confirmations", job_id, request)
    }

    fn reject_row(&self, job_id: JobId, request: &RejectRowRequest) -> ReviewResult<RejectRowResponse> {
        self.post("reject-row", job_id, request)
    }

    fn finalize_review(&self, job_id: JobId, request: &FinalizeRequest) -> ReviewResult<FinalizeResponse> {
        self.post("finalize-review", job_id, request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_follow_job_routes() {
        let b = HttpReviewBackend::new("https://records.example.org/", 46);
        assert_eq!(
            b.endpoint(812, "learn-from-confirmations"),
            "https://records.example.org/api/church/46/ocr/jobs/812/learn-from-confirmations"
        );
    }

    #[test]
    fn from_config_requires_url_and_church() {
        let mut config = ReviewConfig::default();
        assert!(matches!(HttpReviewBackend::from_config(&config), Err(ReviewError::Config(_))));
        config.api_url = Some("http://localhost:3001".to_string());
        assert!(HttpReviewBackend::from_config(&config).is_err());
        config.church_id = Some(46);
        assert!(HttpReviewBackend::from_config(&config).is_ok());
    }

    #[test]
    fn request_bodies_are_camel_case() {
        let body = serde_json::to_value(LearnRequest {
            confirmed_records: vec![ConfirmedRecordPayload {
                source_row_index: 4,
                bbox: FractionalBBox::new(0.1, 0.2, 0.9, 0.25),
                was_adjusted: true,
            }],
            rejected_row_indices: vec![2],
        })
        .unwrap();
        assert_eq!(body["confirmedRecords"][0]["sourceRowIndex"], 4);
        assert_eq!(body["confirmedRecords"][0]["bbox"]["y_max"], 0.25);
        assert_eq!(body["rejectedRowIndices"][0], 2);

        let finalize = serde_json::to_value(FinalizeRequest {
            confirmed_indices: vec![0, 1],
            rejected_indices: vec![],
            learned_params: None,
            save_as_template: false,
            template_name: None,
        })
        .unwrap();
        assert!(finalize.get("templateName").is_none());
        assert_eq!(finalize["saveAsTemplate"], false);
    }

    #[test]
    fn success_flag_gates_responses() {
        let ok: ReextractResponse =
            parse_outcome("reextract-row", r#"{"success":true,"fields":{"deceased_name":"John Smith"},"tokenCount":5}"#)
                .unwrap();
        assert_eq!(ok.fields["deceased_name"], "John Smith");
        assert_eq!(ok.token_count, 5);

        let failed = parse_outcome::<ReextractResponse>("reextract-row", r#"{"success":false}"#);
        assert!(matches!(failed, Err(ReviewError::Remote { operation: "reextract-row", .. })));

        let fin: FinalizeResponse = parse_outcome("finalize-review", r#"{"success":true,"templateId":17}"#).unwrap();
        assert_eq!(fin.template_id.as_deref(), Some("17"));
    }

    #[test]
    fn failure_bodies_are_summarised() {
        assert_eq!(
            describe_failure(500, r#"{"error":"Learn from confirmations failed","message":"no tokens"}"#),
            "Learn from confirmations failed (500): no tokens"
        );
        assert_eq!(describe_failure(404, r#"{"error":"Job not found"}"#), "Job not found (404)");
        assert_eq!(describe_failure(502, ""), "HTTP 502");
    }
}
