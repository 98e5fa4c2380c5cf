//! The result record handed back to the calling automation.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{ErrorInfo, PluginError};

/// Result of one plugin invocation, printed as a single JSON object.
///
/// Failure is reported in-band with `failed: true`; the plugin-specific
/// fields gathered before the failure are still included.
#[derive(Debug, Clone, Serialize)]
pub struct PluginResult {
    pub changed: bool,
    pub failed: bool,
    pub msg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl PluginResult {
    /// A failure before any plugin ran, e.g. an unreadable parameter file.
    pub fn failure(msg: impl Into<String>, error: ErrorInfo) -> Self {
        Self {
            changed: false,
            failed: true,
            msg: Some(msg.into()),
            error: Some(error),
            data: Map::new(),
        }
    }
}

/// What a plugin produced: the typed result fields plus the terminal error,
/// if any.
#[derive(Debug)]
pub struct Outcome<T> {
    pub changed: bool,
    pub data: T,
    pub error: Option<PluginError>,
}

impl<T: Serialize> Outcome<T> {
    pub fn into_result(self) -> PluginResult {
        let data = match serde_json::to_value(&self.data) {
            Ok(Value::Object(map)) => map,
            Ok(other) => {
                let mut map = Map::new();
                map.insert("data".to_string(), other);
                map
            }
            Err(e) => {
                return PluginResult::failure(
                    format!("failed to encode result: {}", e),
                    ErrorInfo {
                        kind: "internal",
                        key: None,
                    },
                );
            }
        };

        PluginResult {
            changed: self.changed,
            failed: self.error.is_some(),
            msg: self.error.as_ref().map(ToString::to_string),
            error: self.error.as_ref().map(PluginError::info),
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use converge_core::{OperationKind, ReconcileError};
    use serde_json::json;

    #[derive(Serialize)]
    struct Fields {
        id: Option<String>,
    }

    #[test]
    fn success_flattens_fields() {
        let outcome = Outcome {
            changed: true,
            data: Fields {
                id: Some("vpc-1".to_string()),
            },
            error: None,
        };
        let value = serde_json::to_value(outcome.into_result()).unwrap();
        assert_eq!(
            value,
            json!({"changed": true, "failed": false, "msg": null, "id": "vpc-1"})
        );
    }

    #[test]
    fn failure_carries_message_and_key() {
        let outcome = Outcome {
            changed: true,
            data: Fields { id: None },
            error: Some(
                ReconcileError::remote(
                    OperationKind::Delete,
                    "10.0.2.0/24",
                    anyhow::anyhow!("DependencyViolation"),
                )
                .into(),
            ),
        };
        let value = serde_json::to_value(outcome.into_result()).unwrap();
        assert_eq!(value["changed"], json!(true));
        assert_eq!(value["failed"], json!(true));
        assert_eq!(
            value["error"],
            json!({"kind": "remote", "key": "10.0.2.0/24"})
        );
        assert!(value["msg"].as_str().unwrap().contains("DependencyViolation"));
    }
}
