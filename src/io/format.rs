//! The `--json` envelope.
//!
//! Every command prints one object: `status`, a machine-readable `code`,
//! a message, the exit code it ends with, and either the command's `data`
//! or the suggestions that go with a failure. Timing goes in `meta`.

use crate::error::MatchError;
use crate::io::exit_code::ExitCode;
use serde::Serialize;
use std::time::Duration;

/// Text tables for people, or the JSON envelope for scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    #[must_use]
    pub fn from_json_flag(json: bool) -> Self {
        if json { Self::Json } else { Self::Text }
    }

    #[must_use]
    pub fn is_json(&self) -> bool {
        matches!(self, Self::Json)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
}

/// One command's JSON output.
#[derive(Debug, Serialize)]
pub struct JsonResponse<T: Serialize = ()> {
    pub status: ResponseStatus,
    /// `OK`, `NOT_FOUND`, or a [`MatchError::status_code`]
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetails>,
    pub exit_code: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetails {
    pub suggestions: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ResponseMeta {
    pub version: &'static str,
    pub elapsed_ms: u64,
}

impl<T: Serialize> JsonResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            status: ResponseStatus::Success,
            code: "OK".to_string(),
            message: "ok".to_string(),
            data: Some(data),
            error: None,
            exit_code: ExitCode::Success as u8,
            meta: None,
        }
    }

    /// Stamps the crate version and the command's run time.
    pub fn timed(mut self, elapsed: Duration) -> Self {
        self.meta = Some(ResponseMeta {
            version: env!("CARGO_PKG_VERSION"),
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        });
        self
    }
}

impl JsonResponse {
    /// A search or lookup that came back empty.
    pub fn not_found(entity: &str, name: &str) -> Self {
        Self::failure(
            "NOT_FOUND",
            format!("{entity} '{name}' not found"),
            vec![
                "Try a broader query".to_string(),
                "Run 'jobmatch build' after importing new postings".to_string(),
            ],
            ExitCode::NotFound,
        )
    }

    pub fn from_error(error: &MatchError) -> Self {
        Self::failure(
            error.status_code(),
            error.to_string(),
            error
                .recovery_suggestions()
                .iter()
                .map(|s| s.to_string())
                .collect(),
            ExitCode::from_error(error),
        )
    }

    fn failure(code: &str, message: String, suggestions: Vec<String>, exit: ExitCode) -> Self {
        Self {
            status: ResponseStatus::Error,
            code: code.to_string(),
            message,
            data: None,
            error: Some(ErrorDetails { suggestions }),
            exit_code: exit as u8,
            meta: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_output_format_from_flag() {
        assert_eq!(OutputFormat::from_json_flag(true), OutputFormat::Json);
        assert_eq!(OutputFormat::from_json_flag(false), OutputFormat::Text);
    }

    #[test]
    fn test_success_envelope() {
        let response = JsonResponse::success(json!({"total": 3}))
            .timed(Duration::from_millis(12));
        let value = serde_json::to_value(&response).unwrap();

        assert_eq!(value["status"], "success");
        assert_eq!(value["code"], "OK");
        assert_eq!(value["exit_code"], 0);
        assert_eq!(value["data"]["total"], 3);
        assert_eq!(value["meta"]["elapsed_ms"], 12);
        assert!(value.get("error").is_none());
    }

    #[test]
    fn test_error_envelope_carries_suggestions() {
        let response = JsonResponse::from_error(&MatchError::BuildInProgress);
        let value = serde_json::to_value(&response).unwrap();

        assert_eq!(value["status"], "error");
        assert_eq!(value["code"], "BUILD_IN_PROGRESS");
        assert_eq!(value["exit_code"], 8);
        assert!(value.get("data").is_none());
        assert!(!value["error"]["suggestions"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_not_found_envelope() {
        let value = serde_json::to_value(JsonResponse::not_found("Jobs matching", "cobol")).unwrap();
        assert_eq!(value["code"], "NOT_FOUND");
        assert_eq!(value["message"], "Jobs matching 'cobol' not found");
        assert_eq!(value["exit_code"], ExitCode::NotFound as u8);
    }
}
