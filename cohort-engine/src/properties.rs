//! Per-engine key/value properties

use cohort_core::codec::round_trip;
use cohort_core::{EngineError, Result};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

use crate::engine::Bindings;

/// Key/value store attached to one engine.
///
/// Every value is passed through the codec on the way in, so anything that
/// cannot be serialized is rejected at write time. Reads hand out owned
/// copies; nothing outside the store can alias a stored value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertiesStore {
    values: BTreeMap<String, JsonValue>,
}

fn invalid(name: &str, reason: impl Into<String>) -> EngineError {
    EngineError::InvalidProperty {
        name: name.to_string(),
        reason: reason.into(),
    }
}

impl PropertiesStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn encode<T: Serialize + ?Sized>(name: &str, value: &T) -> Result<JsonValue> {
        if name.is_empty() {
            return Err(invalid(name, "property names must not be empty"));
        }
        round_trip(value).map_err(|err| invalid(name, err.to_string()))
    }

    pub fn get(&self, name: &str) -> Result<JsonValue> {
        self.values
            .get(name)
            .cloned()
            .ok_or_else(|| invalid(name, "no such property"))
    }

    /// Copies of the named properties, or of every property
    pub fn get_many(&self, names: Option<&[String]>) -> Result<Bindings> {
        match names {
            None => Ok(self.values.clone()),
            Some(names) => names
                .iter()
                .map(|name| self.get(name).map(|value| (name.clone(), value)))
                .collect(),
        }
    }

    pub fn set<T: Serialize + ?Sized>(&mut self, name: impl Into<String>, value: &T) -> Result<()> {
        let name = name.into();
        let value = Self::encode(&name, value)?;
        self.values.insert(name, value);
        Ok(())
    }

    /// Store several properties. Nothing is written unless every value is valid.
    pub fn update(&mut self, properties: Bindings) -> Result<()> {
        let encoded = properties
            .iter()
            .map(|(name, value)| Self::encode(name, value).map(|value| (name.clone(), value)))
            .collect::<Result<Vec<_>>>()?;
        self.values.extend(encoded);
        Ok(())
    }

    pub fn has(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn del(&mut self, name: &str) -> Result<()> {
        self.values
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| invalid(name, "no such property"))
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn keys(&self) -> Vec<String> {
        self.values.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
