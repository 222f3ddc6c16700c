//! Redaction of evidence payloads
//!
//! Secret values never leave the engine verbatim. The redactor walks a payload
//! and masks Secret `data`/`stringData`, fields whose key names a credential,
//! and container `env` entries whose name does.

use crate::constants::REDACTED;
use serde_json::{Map, Value};

pub trait Redactor: Send + Sync {
    fn redact(&self, payload: &Value) -> Value;
}

/// Pass-through redactor
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRedaction;

impl Redactor for NoRedaction {
    fn redact(&self, payload: &Value) -> Value {
        payload.clone()
    }
}

/// Masks secret material anywhere in a payload
#[derive(Debug, Clone, Copy, Default)]
pub struct SecretRedactor;

const SENSITIVE_SUFFIXES: &[&str] = &[
    "password",
    "passwd",
    "token",
    "apikey",
    "secretkey",
    "accesskey",
    "privatekey",
    "clientsecret",
    "credentials",
];

/// Whether a key or env var name refers to credential material
pub fn is_sensitive_name(name: &str) -> bool {
    let normalized: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_lowercase();
    normalized == "secret" || SENSITIVE_SUFFIXES.iter().any(|s| normalized.ends_with(s))
}

fn mask_values(map: &Map<String, Value>) -> Value {
    Value::Object(
        map.keys()
            .map(|k| (k.clone(), Value::String(REDACTED.to_string())))
            .collect(),
    )
}

impl SecretRedactor {
    fn redact_object(&self, map: &Map<String, Value>) -> Value {
        let is_secret = map.get("kind").and_then(|k| k.as_str()) == Some("Secret");
        let env_name_sensitive = map
            .get("name")
            .and_then(|n| n.as_str())
            .is_some_and(is_sensitive_name)
            && map.contains_key("value");

        let mut out = Map::with_capacity(map.len());
        for (key, value) in map {
            let redacted = match value {
                Value::Object(inner) if is_secret && (key == "data" || key == "stringData") => {
                    mask_values(inner)
                }
                Value::String(_) | Value::Number(_) if is_sensitive_name(key) => {
                    Value::String(REDACTED.to_string())
                }
                Value::String(_) if env_name_sensitive && key == "value" => {
                    Value::String(REDACTED.to_string())
                }
                other => self.redact(other),
            };
            out.insert(key.clone(), redacted);
        }
        Value::Object(out)
    }
}

impl Redactor for SecretRedactor {
    fn redact(&self, payload: &Value) -> Value {
        match payload {
            Value::Object(map) => self.redact_object(map),
            Value::Array(items) => Value::Array(items.iter().map(|i| self.redact(i)).collect()),
            other => other.clone(),
        }
    }
}
