//! Elasticsearch error envelope

use quarry::Error;
use serde::{Deserialize, Serialize};

/// `{"error": {...}, "status": N}` as Elasticsearch renders failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EsErrorBody {
    pub error: EsErrorDetail,
    pub status: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EsErrorDetail {
    pub root_cause: Vec<RootCause>,
    #[serde(rename = "type")]
    pub error_type: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootCause {
    #[serde(rename = "type")]
    pub error_type: String,
    pub reason: String,
}

impl From<&Error> for EsErrorBody {
    fn from(err: &Error) -> Self {
        let error_type = err.error_type().to_string();
        let reason = err.to_string();
        Self {
            error: EsErrorDetail {
                root_cause: vec![RootCause {
                    error_type: error_type.clone(),
                    reason: reason.clone(),
                }],
                error_type,
                reason,
            },
            status: err.status(),
        }
    }
}

impl From<Error> for EsErrorBody {
    fn from(err: Error) -> Self {
        Self::from(&err)
    }
}
