//! JSON-RPC protocol types for the rule server
//!
//! Engine errors travel as structured `data` next to the message so a
//! client can point at the offending rule, line or column.

use crate::rules::{CompileError, RuleDocumentError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct Request {
    pub id: Option<serde_json::Value>,
    pub method: String,
    pub params: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct Response {
    pub id: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorResponse>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ErrorData>,
}

/// Where in the authored input an error sits
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ErrorData {
    /// A rule condition or assertion failed to compile
    Condition {
        rule: String,
        expression: String,
        offset: usize,
        /// The session now runs on implicit rules only
        fallback: bool,
    },
    /// The rule document could not be parsed
    DocumentSyntax { line: usize, column: usize },
    /// A parsed rule is inconsistent
    InvalidRule { rule: String },
    UnsupportedVersion { version: u32 },
}

impl From<&CompileError> for ErrorData {
    fn from(err: &CompileError) -> Self {
        ErrorData::Condition {
            rule: err.rule.clone(),
            expression: err.expression.clone(),
            offset: err.source.offset,
            fallback: true,
        }
    }
}

impl From<&RuleDocumentError> for ErrorData {
    fn from(err: &RuleDocumentError) -> Self {
        match err {
            RuleDocumentError::Syntax { line, column, .. } => ErrorData::DocumentSyntax {
                line: *line,
                column: *column,
            },
            RuleDocumentError::InvalidRule { rule, .. } => ErrorData::InvalidRule { rule: rule.clone() },
            RuleDocumentError::UnsupportedVersion(version) => {
                ErrorData::UnsupportedVersion { version: *version }
            }
        }
    }
}

impl Response {
    pub fn success(id: Option<serde_json::Value>, result: serde_json::Value) -> Self {
        Response {
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Success response from any serializable result
    pub fn from_result<T: Serialize>(id: Option<serde_json::Value>, result: &T) -> Self {
        match serde_json::to_value(result) {
            Ok(value) => Self::success(id, value),
            Err(e) => Self::error(
                id,
                error_codes::INTERNAL_ERROR,
                format!("Failed to serialize result: {}", e),
            ),
        }
    }

    pub fn error(id: Option<serde_json::Value>, code: i32, message: String) -> Self {
        Self::error_with_data(id, code, message, None)
    }

    pub fn error_with_data(
        id: Option<serde_json::Value>,
        code: i32,
        message: String,
        data: Option<ErrorData>,
    ) -> Self {
        Response {
            id,
            result: None,
            error: Some(ErrorResponse { code, message, data }),
        }
    }

    /// Authored rules were dropped because one of them failed to compile
    pub fn compile_error(id: Option<serde_json::Value>, err: &CompileError) -> Self {
        Self::error_with_data(
            id,
            error_codes::RULE_COMPILE_FAILED,
            format!("{}; session is running on implicit rules only", err),
            Some(err.into()),
        )
    }

    /// The rule document could not be loaded; structured when it was parsed at all
    pub fn document_error(id: Option<serde_json::Value>, err: &anyhow::Error) -> Self {
        Self::error_with_data(
            id,
            error_codes::RULES_FAILED,
            format!("{:#}", err),
            err.downcast_ref::<RuleDocumentError>().map(ErrorData::from),
        )
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

pub mod error_codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;

    /// Board configuration missing, malformed or invalid
    pub const CONFIG_FAILED: i32 = 2;
    /// Rule document missing, malformed or invalid
    pub const RULES_FAILED: i32 = 3;
    /// Session initialized on implicit rules after a condition failed to compile
    pub const RULE_COMPILE_FAILED: i32 = 4;
    /// A request named an item that was never loaded
    pub const ITEM_NOT_FOUND: i32 = 5;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::ConditionError;

    #[test]
    fn test_compile_error_carries_rule() {
        let err = CompileError {
            rule: "hv".into(),
            expression: "A.NetClass ==".into(),
            source: ConditionError::new("expected operand", 13),
        };
        let json = serde_json::to_value(Response::compile_error(Some(7.into()), &err)).unwrap();
        assert_eq!(json["error"]["code"], error_codes::RULE_COMPILE_FAILED);
        assert_eq!(json["error"]["data"]["kind"], "condition");
        assert_eq!(json["error"]["data"]["rule"], "hv");
        assert_eq!(json["error"]["data"]["offset"], 13);
        assert!(json.get("result").is_none());
    }

    #[test]
    fn test_document_error_data() {
        let err: anyhow::Error = RuleDocumentError::Syntax {
            line: 3,
            column: 14,
            message: "expected value".into(),
        }
        .into();
        let json = serde_json::to_value(Response::document_error(None, &err)).unwrap();
        assert_eq!(json["error"]["data"]["kind"], "document_syntax");
        assert_eq!(json["error"]["data"]["line"], 3);

        // Errors that never reached the parser carry no data
        let io = anyhow::anyhow!("Failed to open file rules.json");
        let json = serde_json::to_value(Response::document_error(None, &io)).unwrap();
        assert!(json["error"].get("data").is_none());
    }
}
