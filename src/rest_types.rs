use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body of a successful chunk upload. Every server revision is covered by
/// these optional fields; anything else in the payload is ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UploadChunkResponse {
    #[serde(default)]
    pub upload_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExperimentRequest {
    pub name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub with_ca19_9: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListRequest {
    pub email: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageResponse {
    pub message: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QcResponse {
    pub qc: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReportResponse {
    pub report: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SummaryResponse {
    pub summary: Value,
}
