//! Parameter record handling shared by all plugins.

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{PluginError, Result};

/// Whether the resource should exist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum State {
    #[default]
    Present,
    Absent,
}

/// Parameters every plugin accepts on top of its own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommonParams {
    pub check_mode: bool,
}

/// Strip the common parameters off a raw record.
pub fn split_common(mut record: Value) -> Result<(CommonParams, Value)> {
    let mut common = CommonParams::default();
    if let Value::Object(map) = &mut record {
        if let Some(value) = map.remove("check_mode") {
            common.check_mode = value.as_bool().ok_or_else(|| {
                PluginError::InvalidParams("check_mode must be a boolean".to_string())
            })?;
        }
    }
    Ok((common, record))
}

/// Decode a plugin's parameter record.
pub fn decode<T: DeserializeOwned>(record: Value) -> Result<T> {
    serde_json::from_value(record).map_err(|e| PluginError::InvalidParams(e.to_string()))
}

pub(crate) fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    #[serde(deny_unknown_fields)]
    struct Sample {
        name: String,
        #[serde(default)]
        state: State,
    }

    #[test]
    fn check_mode_is_split_off() {
        let (common, rest) = split_common(json!({"name": "x", "check_mode": true})).unwrap();
        assert!(common.check_mode);
        let sample: Sample = decode(rest).unwrap();
        assert_eq!(sample.name, "x");
        assert_eq!(sample.state, State::Present);
    }

    #[test]
    fn check_mode_must_be_bool() {
        assert!(split_common(json!({"check_mode": "yes"})).is_err());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = decode::<Sample>(json!({"name": "x", "stat": "absent"})).unwrap_err();
        assert!(matches!(err, PluginError::InvalidParams(_)));
        assert!(err.to_string().contains("stat"));
    }

    #[test]
    fn state_parses_lowercase() {
        let sample: Sample = decode(json!({"name": "x", "state": "absent"})).unwrap();
        assert_eq!(sample.state, State::Absent);
    }
}
