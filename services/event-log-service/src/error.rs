use axum::http::StatusCode;
use serde_path_to_error::Segment;
use std::collections::BTreeMap;
use validator::{ValidationErrors, ValidationErrorsKind};

use crate::models::{ErrorResponse, FieldError};

/// A body that does not fit the event entry schema. Raised before any
/// store write.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("{path}: {message}")]
    Cast { path: String, message: String },
    #[error("{0}")]
    Rules(#[from] ValidationErrors),
}

/// Failure reported by the persistence gateway.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0}")]
    Connectivity(String),
}

/// Everything that can go wrong while ingesting one event.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ValidationError {
    /// Offending fields keyed by their dotted wire path, e.g.
    /// `airReadings.0.humidity`.
    pub fn field_errors(&self) -> BTreeMap<String, FieldError> {
        let mut fields = BTreeMap::new();
        match self {
            Self::Cast { path, message } => {
                fields.insert(
                    path.clone(),
                    FieldError {
                        kind: "cast".to_string(),
                        path: path.clone(),
                        message: message.clone(),
                        value: None,
                    },
                );
            }
            Self::Rules(errors) => collect_field_errors("", errors, &mut fields),
        }
        fields
    }

    pub fn to_response(&self) -> ErrorResponse {
        let errors = self.field_errors();
        let summary = errors
            .values()
            .map(|field| format!("{}: {}", field.path, field.message))
            .collect::<Vec<_>>()
            .join(", ");
        ErrorResponse {
            name: "ValidationError",
            message: format!("EventEntry validation failed: {summary}"),
            errors,
        }
    }
}

impl From<serde_path_to_error::Error<serde_json::Error>> for ValidationError {
    fn from(err: serde_path_to_error::Error<serde_json::Error>) -> Self {
        let path = err
            .path()
            .iter()
            .filter_map(|segment| match segment {
                Segment::Seq { index } => Some(index.to_string()),
                Segment::Map { key } => Some(key.clone()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join(".");
        Self::Cast {
            path,
            message: err.into_inner().to_string(),
        }
    }
}

impl From<mongodb::error::Error> for StoreError {
    fn from(err: mongodb::error::Error) -> Self {
        Self::Connectivity(err.to_string())
    }
}

impl IngestError {
    /// Status used when error responses carry a proper error code.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn to_response(&self) -> ErrorResponse {
        match self {
            Self::Validation(err) => err.to_response(),
            Self::Store(err) => ErrorResponse::new("ConnectivityError", err.to_string()),
        }
    }
}

fn collect_field_errors(
    prefix: &str,
    errors: &ValidationErrors,
    fields: &mut BTreeMap<String, FieldError>,
) {
    for (field, kind) in errors.errors() {
        let path = join_path(prefix, &wire_name(field));
        match kind {
            ValidationErrorsKind::Field(failures) => {
                // One message per field is enough; `required` wins over `length`.
                if let Some(failure) = failures.first() {
                    let kind = match &*failure.code {
                        "length" => "required".to_string(),
                        code => code.to_string(),
                    };
                    let message = failure
                        .message
                        .as_ref()
                        .map(|message| message.to_string())
                        .unwrap_or_else(|| format!("Path `{path}` is invalid"));
                    let value = failure
                        .params
                        .get("value")
                        .filter(|value| !value.is_null())
                        .cloned();
                    fields.insert(
                        path.clone(),
                        FieldError {
                            kind,
                            path,
                            message,
                            value,
                        },
                    );
                }
            }
            ValidationErrorsKind::Struct(nested) => collect_field_errors(&path, nested, fields),
            ValidationErrorsKind::List(items) => {
                for (index, nested) in items {
                    collect_field_errors(&format!("{path}.{index}"), nested, fields);
                }
            }
        }
    }
}

fn join_path(prefix: &str, field: &str) -> String {
    if prefix.is_empty() {
        field.to_string()
    } else {
        format!("{prefix}.{field}")
    }
}

// Field names reach the validator in Rust casing. Mirrors the
// `rename_all = "camelCase"` on the `New*` models; keep the two in step.
fn wire_name(field: &str) -> String {
    let mut name = String::with_capacity(field.len());
    let mut upper = false;
    for ch in field.chars() {
        if ch == '_' {
            upper = true;
        } else if upper {
            name.extend(ch.to_uppercase());
            upper = false;
        } else {
            name.push(ch);
        }
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewEventEntry;
    use serde_json::json;

    #[test]
    fn wire_name_camel_cases_rust_fields() {
        assert_eq!(wire_name("air_readings"), "airReadings");
        assert_eq!(wire_name("heat_index"), "heatIndex");
        assert_eq!(wire_name("sender"), "sender");
        assert_eq!(wire_name("soilReadings"), "soilReadings");
    }

    #[test]
    fn rule_failures_render_as_validation_error_body() {
        let err = NewEventEntry::from_body(json!({
            "airReadings": [{ "sensor": "x", "humidity": 150 }]
        }))
        .unwrap_err();

        let body = serde_json::to_value(err.to_response()).unwrap();
        assert_eq!(body["name"], "ValidationError");
        assert_eq!(body["errors"]["sender"]["kind"], "required");
        assert_eq!(
            body["errors"]["sender"]["message"],
            "Enter the name of the sender/device"
        );
        assert_eq!(body["errors"]["airReadings.0.humidity"]["kind"], "range");
        assert_eq!(body["errors"]["airReadings.0.humidity"]["value"], json!(150.0));
        let message = body["message"].as_str().unwrap();
        assert!(message.starts_with("EventEntry validation failed: "));
        assert!(message.contains("airReadings.0.humidity: humidity must be between 0 and 100"));
        assert!(message.contains("sender: Enter the name of the sender/device"));
    }

    #[test]
    fn empty_sender_reports_required_kind() {
        let err = NewEventEntry::from_body(json!({ "sender": "" })).unwrap_err();
        assert_eq!(err.field_errors()["sender"].kind, "required");
    }

    #[test]
    fn store_failures_map_to_service_unavailable() {
        let err = IngestError::from(StoreError::Connectivity(
            "Server selection timeout: No available servers".to_string(),
        ));
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);

        let body = serde_json::to_value(err.to_response()).unwrap();
        assert_eq!(
            body,
            json!({
                "name": "ConnectivityError",
                "message": "Server selection timeout: No available servers"
            })
        );
    }

    #[test]
    fn validation_failures_map_to_bad_request() {
        let err: IngestError = NewEventEntry::from_body(json!({})).unwrap_err().into();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
