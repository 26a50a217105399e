//! Resolved parameters for constructing a chat client.

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::warn;

use super::error::LLMError;

/// Parameters handed to a client constructor.
///
/// Optional fields left as `None` fall back to the client's own defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientParams {
    pub api_key: Option<String>,
    pub organization: Option<String>,
    pub base_url: String,
    pub timeout: Option<Duration>,
    pub max_retries: Option<u32>,
    pub default_headers: Option<BTreeMap<String, String>>,
    pub default_query: Option<BTreeMap<String, String>>,
}

impl ClientParams {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Apply caller-supplied overrides on top of the resolved fields.
    ///
    /// A `null` value clears an optional field. `organization` is ignored.
    pub fn apply_extra(&mut self, extra: &Map<String, Value>) -> Result<(), LLMError> {
        for (key, value) in extra {
            match key.as_str() {
                "api_key" => self.api_key = optional_string(key, value)?,
                "base_url" => {
                    self.base_url = optional_string(key, value)?
                        .ok_or_else(|| invalid(key, "base_url cannot be null"))?;
                }
                "timeout" => self.timeout = optional_duration(key, value)?,
                "max_retries" => self.max_retries = optional_u32(key, value)?,
                "default_headers" => self.default_headers = optional_string_map(key, value)?,
                "default_query" => self.default_query = optional_string_map(key, value)?,
                "organization" => {
                    warn!("Ignoring 'organization' client parameter; the endpoint does not use it");
                }
                _ => return Err(invalid(key, "unknown parameter")),
            }
        }
        Ok(())
    }
}

fn invalid(key: &str, reason: impl Into<String>) -> LLMError {
    LLMError::InvalidParam {
        key: key.to_string(),
        reason: reason.into(),
    }
}

fn optional_string(key: &str, value: &Value) -> Result<Option<String>, LLMError> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        _ => Err(invalid(key, "expected a string")),
    }
}

fn optional_duration(key: &str, value: &Value) -> Result<Option<Duration>, LLMError> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => {
            let secs = n
                .as_f64()
                .ok_or_else(|| invalid(key, "expected seconds as a number"))?;
            Duration::try_from_secs_f64(secs)
                .map(Some)
                .map_err(|e| invalid(key, e.to_string()))
        }
        _ => Err(invalid(key, "expected seconds as a number")),
    }
}

fn optional_u32(key: &str, value: &Value) -> Result<Option<u32>, LLMError> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => n
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .map(Some)
            .ok_or_else(|| invalid(key, "expected a non-negative integer")),
        _ => Err(invalid(key, "expected a non-negative integer")),
    }
}

fn optional_string_map(
    key: &str,
    value: &Value,
) -> Result<Option<BTreeMap<String, String>>, LLMError> {
    match value {
        Value::Null => Ok(None),
        Value::Object(obj) => obj
            .iter()
            .map(|(k, v)| match v {
                Value::String(s) => Ok((k.clone(), s.clone())),
                _ => Err(invalid(key, format!("value for '{k}' must be a string"))),
            })
            .collect::<Result<BTreeMap<_, _>, _>>()
            .map(Some),
        _ => Err(invalid(key, "expected an object of strings")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn extras(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("extras must be an object"),
        }
    }

    #[test]
    fn test_extra_overrides_base_url_and_key() {
        let mut params = ClientParams::new("https://llm.monsterapi.ai/v1/");
        params.api_key = Some("xyz".to_string());

        params
            .apply_extra(&extras(json!({ "base_url": "https://custom/" })))
            .unwrap();

        assert_eq!(params.base_url, "https://custom/");
        assert_eq!(params.api_key.as_deref(), Some("xyz"));
    }

    #[test]
    fn test_extra_replaces_maps_and_numbers() {
        let mut params = ClientParams::new("https://a/");
        params.default_headers = Some(BTreeMap::from([("x-a".to_string(), "1".to_string())]));
        params.max_retries = Some(5);

        params
            .apply_extra(&extras(json!({
                "default_headers": { "x-b": "2" },
                "max_retries": 0,
                "timeout": 2.5,
            })))
            .unwrap();

        assert_eq!(
            params.default_headers,
            Some(BTreeMap::from([("x-b".to_string(), "2".to_string())]))
        );
        assert_eq!(params.max_retries, Some(0));
        assert_eq!(params.timeout, Some(Duration::from_millis(2500)));
    }

    #[test]
    fn test_extra_null_clears_optional_field() {
        let mut params = ClientParams::new("https://a/");
        params.api_key = Some("k".to_string());
        params.default_query = Some(BTreeMap::new());

        params
            .apply_extra(&extras(json!({ "api_key": null, "default_query": null })))
            .unwrap();

        assert!(params.api_key.is_none());
        assert!(params.default_query.is_none());
    }

    #[test]
    fn test_extra_ignores_organization() {
        let mut params = ClientParams::new("https://a/");
        params
            .apply_extra(&extras(json!({
                "organization": "org-1",
                "base_url": "https://b/",
            })))
            .unwrap();
        assert!(params.organization.is_none());
        assert_eq!(params.base_url, "https://b/");
    }

    #[test]
    fn test_extra_rejects_unknown_and_mistyped() {
        let mut params = ClientParams::new("https://a/");
        assert!(params.apply_extra(&extras(json!({ "proxy": "x" }))).is_err());
        assert!(params.apply_extra(&extras(json!({ "max_retries": -1 }))).is_err());
        assert!(params.apply_extra(&extras(json!({ "timeout": -3.0 }))).is_err());
        assert!(params.apply_extra(&extras(json!({ "base_url": null }))).is_err());
        assert!(
            params
                .apply_extra(&extras(json!({ "default_headers": { "x": 1 } })))
                .is_err()
        );
    }
}
