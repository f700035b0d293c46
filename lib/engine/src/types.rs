//! The type registry: logical type keys, a `NoValue` sentinel, and the
//! pluggable converters used when connecting IOs or assigning values.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

/// The bypass type key: accepts any value, performs no conversion.
pub const ANY_TYPE: &str = "any";

/// The value carried by a [`crate::io::NodeIo`].
///
/// Wraps a [`JsonValue`] so the engine's core stays independent of any
/// particular Rust value type; node evaluators work with `IoValue` and the
/// type registry validates/converts between declared type keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IoValue {
    /// No value has been produced yet. Distinct from any legal JSON value,
    /// including `null`.
    NoValue(NoValueMarker),
    /// A concrete value.
    Value(JsonValue),
}

/// Marker type making `NoValue` serialize/deserialize as a unique tag rather
/// than colliding with JSON `null`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoValueMarker {
    #[serde(rename = "__novalue__")]
    marker: bool,
}

impl IoValue {
    /// The `NoValue` sentinel.
    #[must_use]
    pub const fn no_value() -> Self {
        Self::NoValue(NoValueMarker { marker: true })
    }

    /// Wraps a concrete JSON value.
    #[must_use]
    pub const fn value(v: JsonValue) -> Self {
        Self::Value(v)
    }

    /// True if this is the `NoValue` sentinel.
    #[must_use]
    pub const fn is_no_value(&self) -> bool {
        matches!(self, Self::NoValue(_))
    }

    /// Returns the underlying JSON value, if any.
    #[must_use]
    pub const fn as_json(&self) -> Option<&JsonValue> {
        match self {
            Self::NoValue(_) => None,
            Self::Value(v) => Some(v),
        }
    }
}

impl Default for IoValue {
    fn default() -> Self {
        Self::no_value()
    }
}

impl fmt::Display for IoValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoValue(_) => write!(f, "<no value>"),
            Self::Value(v) => write!(f, "{v}"),
        }
    }
}

/// A function converting a value from one declared type to another.
///
/// Boxed so the registry can hold a heterogeneous set of converters keyed by
/// `(from, to)` type pairs.
pub type Converter = Arc<dyn Fn(&JsonValue) -> Result<JsonValue, String> + Send + Sync>;

/// Error returned when no conversion path exists between two type keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoConverterError {
    pub from: String,
    pub to: String,
}

impl fmt::Display for NoConverterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "no converter from '{}' to '{}'", self.from, self.to)
    }
}

impl std::error::Error for NoConverterError {}

/// String-keyed logical type map with pluggable converters between declared
/// types. Shared via `Arc` and guarded by a single reader-writer lock, the
/// same sharing pattern the library's shelf list uses.
#[derive(Clone)]
pub struct TypeRegistry {
    inner: Arc<RwLock<Inner>>,
}

struct Inner {
    known_types: std::collections::HashSet<String>,
    converters: HashMap<(String, String), Converter>,
}

impl TypeRegistry {
    /// Builds a registry pre-populated with the built-in JSON-primitive
    /// types and their conventional converters.
    #[must_use]
    pub fn with_defaults() -> Self {
        let registry = Self::empty();
        for t in ["any", "str", "int", "float", "bool", "bytes", "list", "dict"] {
            registry.add_type(t);
        }

        registry.add_converter("int", "float", |v| {
            v.as_i64()
                .map(|n| JsonValue::from(n as f64))
                .ok_or_else(|| "expected integer".to_string())
        });
        registry.add_converter("float", "int", |v| {
            v.as_f64()
                .map(|n| JsonValue::from(n as i64))
                .ok_or_else(|| "expected float".to_string())
        });
        for numeric in ["int", "float", "bool", "list", "dict"] {
            registry.add_converter(numeric, "str", |v| Ok(JsonValue::String(v.to_string())));
        }

        registry
    }

    /// Builds a registry with no types registered at all (not even `any`).
    #[must_use]
    pub fn empty() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                known_types: std::collections::HashSet::new(),
                converters: HashMap::new(),
            })),
        }
    }

    /// Registers a logical type key. Idempotent.
    pub fn add_type(&self, key: impl Into<String>) {
        let mut inner = self.inner.write().expect("type registry lock poisoned");
        inner.known_types.insert(key.into());
    }

    /// Registers a converter from `from` to `to`. Overwrites any existing
    /// converter for the same pair.
    pub fn add_converter<F>(&self, from: impl Into<String>, to: impl Into<String>, f: F)
    where
        F: Fn(&JsonValue) -> Result<JsonValue, String> + Send + Sync + 'static,
    {
        let mut inner = self.inner.write().expect("type registry lock poisoned");
        inner
            .converters
            .insert((from.into(), to.into()), Arc::new(f));
    }

    /// Resolves a type key, falling back to [`ANY_TYPE`] when unknown.
    #[must_use]
    pub fn resolve(&self, key: &str) -> String {
        let inner = self.inner.read().expect("type registry lock poisoned");
        if inner.known_types.contains(key) {
            key.to_string()
        } else {
            ANY_TYPE.to_string()
        }
    }

    /// Converts `value` from `from_type` to `to_type`.
    ///
    /// Identity when the types match or either side is [`ANY_TYPE`].
    /// Otherwise looks up a registered converter.
    pub fn convert(
        &self,
        value: &JsonValue,
        from_type: &str,
        to_type: &str,
    ) -> Result<JsonValue, NoConverterError> {
        if from_type == to_type || from_type == ANY_TYPE || to_type == ANY_TYPE {
            return Ok(value.clone());
        }
        let inner = self.inner.read().expect("type registry lock poisoned");
        match inner
            .converters
            .get(&(from_type.to_string(), to_type.to_string()))
        {
            Some(converter) => converter(value).map_err(|_| NoConverterError {
                from: from_type.to_string(),
                to: to_type.to_string(),
            }),
            None => Err(NoConverterError {
                from: from_type.to_string(),
                to: to_type.to_string(),
            }),
        }
    }

    /// True if a conversion path (including identity and `any`-bypass)
    /// exists between the two types.
    #[must_use]
    pub fn is_compatible(&self, from_type: &str, to_type: &str) -> bool {
        if from_type == to_type || from_type == ANY_TYPE || to_type == ANY_TYPE {
            return true;
        }
        let inner = self.inner.read().expect("type registry lock poisoned");
        inner
            .converters
            .contains_key(&(from_type.to_string(), to_type.to_string()))
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read().expect("type registry lock poisoned");
        f.debug_struct("TypeRegistry")
            .field("known_types", &inner.known_types)
            .field("converter_count", &inner.converters.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_type_resolves_to_any() {
        let reg = TypeRegistry::with_defaults();
        assert_eq!(reg.resolve("nonsense"), ANY_TYPE);
        assert_eq!(reg.resolve("int"), "int");
    }

    #[test]
    fn identity_conversion_always_succeeds() {
        let reg = TypeRegistry::empty();
        let v = JsonValue::from(3);
        assert_eq!(reg.convert(&v, "int", "int").unwrap(), v);
    }

    #[test]
    fn any_bypasses_conversion() {
        let reg = TypeRegistry::empty();
        let v = JsonValue::from("x");
        assert_eq!(reg.convert(&v, "str", ANY_TYPE).unwrap(), v);
    }

    #[test]
    fn missing_converter_errors() {
        let reg = TypeRegistry::empty();
        let v = JsonValue::from(3);
        assert!(reg.convert(&v, "int", "dict").is_err());
    }

    #[test]
    fn int_to_float_converter() {
        let reg = TypeRegistry::with_defaults();
        let v = JsonValue::from(2);
        let out = reg.convert(&v, "int", "float").unwrap();
        assert_eq!(out, JsonValue::from(2.0));
    }

    #[test]
    fn no_value_is_distinct_from_json_null() {
        let nv = IoValue::no_value();
        let null = IoValue::value(JsonValue::Null);
        assert!(nv.is_no_value());
        assert!(!null.is_no_value());
        assert_ne!(nv, null);
    }
}
