//! JSON rendering settings shared by output-producing tasks

use reqwest::Url;
use serde::Serialize;
use serde_json::Value;

use crate::error::Result;

/// JSON encoder configured once per scope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonCodec {
    /// Indent output
    pub pretty: bool,
    /// Drop null fields and empty objects/arrays
    pub prune: bool,
    /// Absolute URLs sharing this base are written as relative references
    pub base: Option<Url>,
}

impl Default for JsonCodec {
    fn default() -> Self {
        Self {
            pretty: true,
            prune: true,
            base: None,
        }
    }
}

impl JsonCodec {
    /// Encodes `value` as a JSON string
    pub fn encode<T: Serialize>(&self, value: &T) -> Result<String> {
        let mut value = serde_json::to_value(value)?;
        if self.prune {
            prune(&mut value);
        }
        if let Some(ref base) = self.base {
            relativize(&mut value, base);
        }
        let json = if self.pretty {
            serde_json::to_string_pretty(&value)?
        } else {
            serde_json::to_string(&value)?
        };
        Ok(json)
    }
}

/// Removes empty members in place, returning whether `value` itself is now empty
fn prune(value: &mut Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => {
            map.retain(|_, member| !prune(member));
            map.is_empty()
        }
        Value::Array(items) => {
            items.retain_mut(|item| !prune(item));
            items.is_empty()
        }
        _ => false,
    }
}

/// Rewrites string values holding URLs under `base` as relative references
fn relativize(value: &mut Value, base: &Url) {
    match value {
        Value::String(text) => {
            let relative = Url::parse(text)
                .ok()
                .filter(|url| url.as_str().starts_with(base.as_str()))
                .and_then(|url| base.make_relative(&url));
            if let Some(relative) = relative {
                *text = relative;
            }
        }
        Value::Object(map) => map.values_mut().for_each(|member| relativize(member, base)),
        Value::Array(items) => items.iter_mut().for_each(|item| relativize(item, base)),
        _ => {}
    }
}
