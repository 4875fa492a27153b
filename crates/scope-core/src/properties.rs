//! String-valued device properties.
//!
//! Adapters expose their settings to the host as named properties holding a
//! string value. Each property declares a [`PropertyKind`] the value must parse
//! as, an optional set of allowed values, and whether the host may write it.
//!
//! ```rust,ignore
//! let mut table = PropertyTable::new();
//! table.insert(Property::new("Mode", "Multi-Channel")
//!     .with_choices(["Multi-Channel", "Single"]));
//! table.insert(Property::new("CameraID", "V1.0").read_only());
//!
//! table.set("Mode", "Single")?;
//! assert!(table.set("CameraID", "V2.0").is_err());
//! ```
//!
//! Read-only properties can still be refreshed by the driver itself through
//! [`PropertyTable::update`].

use crate::error::PropertyError;
use std::collections::BTreeMap;

/// Value type a property's string must parse as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PropertyKind {
    /// Any text
    #[default]
    String,
    /// Parses as `i64`
    Integer,
    /// Parses as `f64`
    Float,
}

impl PropertyKind {
    /// Name used in parse errors.
    pub fn label(&self) -> &'static str {
        match self {
            PropertyKind::String => "string",
            PropertyKind::Integer => "integer",
            PropertyKind::Float => "float",
        }
    }

    fn accepts(&self, value: &str) -> bool {
        match self {
            PropertyKind::String => true,
            PropertyKind::Integer => value.trim().parse::<i64>().is_ok(),
            PropertyKind::Float => value.trim().parse::<f64>().is_ok(),
        }
    }
}

/// One named property.
#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    name: String,
    value: String,
    kind: PropertyKind,
    read_only: bool,
    allowed: Vec<String>,
}

impl Property {
    /// String property with an initial value.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            kind: PropertyKind::String,
            read_only: false,
            allowed: Vec::new(),
        }
    }

    /// Integer property.
    pub fn integer(name: impl Into<String>, value: i64) -> Self {
        Self::new(name, value.to_string()).with_kind(PropertyKind::Integer)
    }

    /// Float property.
    pub fn float(name: impl Into<String>, value: f64) -> Self {
        Self::new(name, value.to_string()).with_kind(PropertyKind::Float)
    }

    /// Change the declared value type.
    pub fn with_kind(mut self, kind: PropertyKind) -> Self {
        self.kind = kind;
        self
    }

    /// Restrict the property to a fixed set of values.
    pub fn with_choices<I, S>(mut self, choices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed = choices.into_iter().map(Into::into).collect();
        self
    }

    /// Refuse host writes; the driver can still update the value.
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Property name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current value.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Declared value type.
    pub fn kind(&self) -> PropertyKind {
        self.kind
    }

    /// Whether host writes are refused.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Allowed values, empty when unrestricted.
    pub fn allowed_values(&self) -> &[String] {
        &self.allowed
    }

    /// Validate `value` against the allowed set and kind.
    pub fn check(&self, value: &str) -> Result<(), PropertyError> {
        if !self.allowed.is_empty() && !self.allowed.iter().any(|a| a == value) {
            return Err(PropertyError::InvalidValue {
                name: self.name.clone(),
                value: value.to_string(),
            });
        }
        if !self.kind.accepts(value) {
            return Err(PropertyError::Parse {
                name: self.name.clone(),
                value: value.to_string(),
                kind: self.kind.label(),
            });
        }
        Ok(())
    }
}

/// Ordered collection of a device's properties.
#[derive(Debug, Clone, Default)]
pub struct PropertyTable {
    entries: BTreeMap<String, Property>,
}

impl PropertyTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a property, replacing any earlier one with the same name.
    pub fn insert(&mut self, property: Property) {
        self.entries.insert(property.name.clone(), property);
    }

    /// Whether `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Property names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Number of registered properties.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no properties.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Full property entry, if registered.
    pub fn property(&self, name: &str) -> Option<&Property> {
        self.entries.get(name)
    }

    /// Current value of a registered property.
    pub fn get(&self, name: &str) -> Result<&str, PropertyError> {
        self.entries
            .get(name)
            .map(|p| p.value.as_str())
            .ok_or_else(|| PropertyError::Unknown(name.to_string()))
    }

    /// Host-side write: honours read-only, allowed values and kind.
    pub fn set(&mut self, name: &str, value: &str) -> Result<(), PropertyError> {
        let property = self
            .entries
            .get_mut(name)
            .ok_or_else(|| PropertyError::Unknown(name.to_string()))?;
        if property.read_only {
            return Err(PropertyError::ReadOnly(name.to_string()));
        }
        property.check(value)?;
        property.value = value.to_string();
        Ok(())
    }

    /// Driver-side write: bypasses the read-only flag but still validates.
    pub fn update(&mut self, name: &str, value: impl Into<String>) -> Result<(), PropertyError> {
        let value = value.into();
        let property = self
            .entries
            .get_mut(name)
            .ok_or_else(|| PropertyError::Unknown(name.to_string()))?;
        property.check(&value)?;
        property.value = value;
        Ok(())
    }
}
