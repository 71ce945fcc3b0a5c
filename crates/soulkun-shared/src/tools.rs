//! Tool catalog contracts: specs, calls, and execution results.
//!
//! A tool is a named, schema-validated business action. Validation fails
//! closed: a call naming an unknown tool, missing a required parameter,
//! carrying an unknown parameter, or using the wrong type is rejected, never
//! coerced into something executable.

use serde::{Deserialize, Serialize};

/// Risk classification of a tool, recorded in the catalog and in the
/// decision log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    ReadOnly,
    Low,
    Medium,
    High,
}

/// Accepted parameter value types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    String,
    Integer,
    Number,
    Boolean,
}

impl ParamKind {
    fn matches(&self, value: &serde_json::Value) -> bool {
        match self {
            Self::String => value.is_string(),
            // Accept integers where a number is expected, not the reverse.
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
        }
    }
}

/// One declared parameter of a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    pub required: bool,
    pub description: String,
}

impl ParamSpec {
    pub fn required(name: &str, kind: ParamKind, description: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            required: true,
            description: description.to_string(),
        }
    }

    pub fn optional(name: &str, kind: ParamKind, description: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            required: false,
            description: description.to_string(),
        }
    }
}

/// Catalog entry describing a tool's interface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub risk: RiskLevel,
    pub params: Vec<ParamSpec>,
}

/// Why a tool call failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamViolation {
    UnknownTool(String),
    MissingRequired(String),
    UnknownParam(String),
    WrongType { param: String, expected: ParamKind },
    NotAnObject,
}

impl std::fmt::Display for ParamViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownTool(name) => write!(f, "unknown tool: {}", name),
            Self::MissingRequired(p) => write!(f, "missing required parameter: {}", p),
            Self::UnknownParam(p) => write!(f, "unknown parameter: {}", p),
            Self::WrongType { param, expected } => {
                write!(f, "parameter {} is not a {:?}", param, expected)
            }
            Self::NotAnObject => write!(f, "parameters must be an object"),
        }
    }
}

impl ToolSpec {
    /// Validate parameters against this spec. Fails closed.
    pub fn validate(&self, params: &serde_json::Value) -> Result<(), ParamViolation> {
        let map = match params {
            serde_json::Value::Object(map) => map,
            serde_json::Value::Null if self.params.iter().all(|p| !p.required) => {
                return Ok(());
            }
            _ => return Err(ParamViolation::NotAnObject),
        };

        for spec in &self.params {
            match map.get(&spec.name) {
                Some(value) => {
                    if !spec.kind.matches(value) {
                        return Err(ParamViolation::WrongType {
                            param: spec.name.clone(),
                            expected: spec.kind,
                        });
                    }
                }
                None if spec.required => {
                    return Err(ParamViolation::MissingRequired(spec.name.clone()));
                }
                None => {}
            }
        }

        for key in map.keys() {
            if !self.params.iter().any(|p| &p.name == key) {
                return Err(ParamViolation::UnknownParam(key.clone()));
            }
        }

        Ok(())
    }

    /// JSON schema fragment handed to the LLM provider.
    pub fn schema_json(&self) -> serde_json::Value {
        let properties: serde_json::Map<String, serde_json::Value> = self
            .params
            .iter()
            .map(|p| {
                let ty = match p.kind {
                    ParamKind::String => "string",
                    ParamKind::Integer => "integer",
                    ParamKind::Number => "number",
                    ParamKind::Boolean => "boolean",
                };
                (
                    p.name.clone(),
                    serde_json::json!({ "type": ty, "description": p.description }),
                )
            })
            .collect();
        let required: Vec<&str> = self
            .params
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();
        serde_json::json!({
            "name": self.name,
            "description": self.description,
            "input_schema": {
                "type": "object",
                "properties": properties,
                "required": required,
            }
        })
    }
}

/// A proposed invocation of a catalog tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub params: serde_json::Value,
}

impl ToolCall {
    pub fn new(name: &str, params: serde_json::Value) -> Self {
        Self {
            name: name.to_string(),
            params,
        }
    }
}

/// Sanitized failure classification. This is the only error detail that may
/// reach a user-visible reply or the decision log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidParameters,
    NotFound,
    Conflict,
    Unavailable,
    Timeout,
    Internal,
}

impl ErrorKind {
    /// Canned user-facing text for a failure of this kind.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::InvalidParameters => "指定された内容をうまく読み取れませんでした。もう一度具体的に教えてください。",
            Self::NotFound => "対象が見つかりませんでした。名前や番号を確認してもらえますか?",
            Self::Conflict => "すでに同じ内容が登録されているようです。",
            Self::Unavailable => "いま外部サービスにつながりにくいようです。少し時間をおいて試してください。",
            Self::Timeout => "処理に時間がかかりすぎたため中断しました。もう一度お願いします。",
            Self::Internal => "処理中に問題が起きました。もう一度試してもらえますか?",
        }
    }
}

/// Normalized outcome of a tool execution. Constructed only by the executor;
/// handlers never build one directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub message: String,
    pub data: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl ExecutionResult {
    pub fn ok(message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            success: true,
            message: message.into(),
            data,
            error_kind: None,
        }
    }

    pub fn failure(kind: ErrorKind) -> Self {
        Self {
            success: false,
            message: kind.user_message().to_string(),
            data: serde_json::Value::Null,
            error_kind: Some(kind),
        }
    }
}

/// What a handler returns on success: a user-facing message plus structured
/// data. The executor wraps this into an [`ExecutionResult`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerReply {
    pub message: String,
    pub data: serde_json::Value,
}

impl HandlerReply {
    pub fn new(message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            message: message.into(),
            data,
        }
    }
}

/// Handler-side failure. The `detail` strings are internal: the executor
/// maps each variant to its sanitized [`ErrorKind`] and the detail never
/// leaves the server-side log.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("invalid input: {0}")]
    Invalid(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("dependency unavailable: {0}")]
    Unavailable(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl HandlerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Invalid(_) => ErrorKind::InvalidParameters,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Unavailable(_) => ErrorKind::Unavailable,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec() -> ToolSpec {
        ToolSpec {
            name: "delete_goal".to_string(),
            description: "Delete a tracked goal".to_string(),
            risk: RiskLevel::High,
            params: vec![
                ParamSpec::required("goal_id", ParamKind::Integer, "Goal number"),
                ParamSpec::optional("reason", ParamKind::String, "Why it is removed"),
            ],
        }
    }

    #[test]
    fn test_validate_ok() {
        assert!(spec().validate(&json!({"goal_id": 3})).is_ok());
        assert!(spec()
            .validate(&json!({"goal_id": 3, "reason": "done"}))
            .is_ok());
    }

    #[test]
    fn test_validate_missing_required() {
        let err = spec().validate(&json!({"reason": "done"})).unwrap_err();
        assert_eq!(err, ParamViolation::MissingRequired("goal_id".to_string()));
    }

    #[test]
    fn test_validate_wrong_type() {
        let err = spec().validate(&json!({"goal_id": "three"})).unwrap_err();
        assert!(matches!(err, ParamViolation::WrongType { .. }));
    }

    #[test]
    fn test_validate_unknown_param_fails_closed() {
        let err = spec()
            .validate(&json!({"goal_id": 1, "force": true}))
            .unwrap_err();
        assert_eq!(err, ParamViolation::UnknownParam("force".to_string()));
    }

    #[test]
    fn test_validate_non_object() {
        let err = spec().validate(&json!([1, 2])).unwrap_err();
        assert_eq!(err, ParamViolation::NotAnObject);
    }

    #[test]
    fn test_schema_json_lists_required() {
        let schema = spec().schema_json();
        let required = schema["input_schema"]["required"].as_array().unwrap();
        assert_eq!(required.len(), 1);
        assert_eq!(required[0], "goal_id");
    }

    #[test]
    fn test_failure_uses_canned_message() {
        let result = ExecutionResult::failure(ErrorKind::Internal);
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::Internal));
        assert_eq!(result.message, ErrorKind::Internal.user_message());
    }

    #[test]
    fn test_handler_error_kind_mapping() {
        assert_eq!(
            HandlerError::NotFound("goal 3".into()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            HandlerError::Internal("postgres://u:p@db/x".into()).kind(),
            ErrorKind::Internal
        );
    }
}
