//! Property descriptor registry.
//!
//! The registry maps property names to their type, description and optional
//! validator. A process-wide instance is initialised once, from the built-in
//! table unless [`install`] supplied another one first, and is read-only
//! afterwards.

use crate::error::ProtocolError;
use crate::property::{parse_mac, Property, PropertyName, PropertyValue};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::OnceLock;

/// Built-in property table.
pub const BUILTIN_TABLE: &str = include_str!("../properties.yaml");

/// Semantic type of a property value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyType {
    String,
    Decimal,
    Hex,
    Log,
    Mac,
    ConfigBlob,
    Binary,
}

impl PropertyType {
    /// Returns the table tag of this type.
    pub fn tag(&self) -> &'static str {
        match self {
            PropertyType::String => "str",
            PropertyType::Decimal => "dec",
            PropertyType::Hex => "hex",
            PropertyType::Log => "log",
            PropertyType::Mac => "mac",
            PropertyType::ConfigBlob => "cfb",
            PropertyType::Binary => "bin",
        }
    }

    pub fn from_tag(tag: &str) -> Result<Self, ProtocolError> {
        match tag {
            "str" => Ok(PropertyType::String),
            "dec" => Ok(PropertyType::Decimal),
            "hex" => Ok(PropertyType::Hex),
            "log" => Ok(PropertyType::Log),
            "mac" => Ok(PropertyType::Mac),
            "cfb" => Ok(PropertyType::ConfigBlob),
            "bin" => Ok(PropertyType::Binary),
            other => Err(ProtocolError::UnsupportedType(other.to_string())),
        }
    }

    /// Decodes raw wire bytes into a value of this type.
    pub fn decode(&self, raw: &[u8]) -> Result<PropertyValue, String> {
        match self {
            PropertyType::Decimal | PropertyType::Hex => {
                let bytes: [u8; 4] = raw
                    .try_into()
                    .map_err(|_| format!("expected 4 bytes, got {}", raw.len()))?;
                let value = u32::from_be_bytes(bytes);
                Ok(if *self == PropertyType::Decimal {
                    PropertyValue::Decimal(value)
                } else {
                    PropertyValue::Hex(value)
                })
            }
            PropertyType::Mac => {
                if let Ok(mac) = <[u8; 6]>::try_from(raw) {
                    return Ok(PropertyValue::Mac(mac));
                }
                std::str::from_utf8(raw)
                    .ok()
                    .and_then(parse_mac)
                    .map(PropertyValue::Mac)
                    .ok_or_else(|| {
                        format!("expected 6 bytes or a colon separated address, got {} bytes", raw.len())
                    })
            }
            PropertyType::String => Ok(PropertyValue::String(Bytes::copy_from_slice(raw))),
            PropertyType::Log => Ok(PropertyValue::Log(Bytes::copy_from_slice(raw))),
            PropertyType::ConfigBlob => Ok(PropertyValue::ConfigBlob(Bytes::copy_from_slice(raw))),
            PropertyType::Binary => Ok(PropertyValue::Binary(Bytes::copy_from_slice(raw))),
        }
    }

    /// Parses user supplied text into a value of this type.
    pub fn parse_text(&self, text: &str) -> Result<PropertyValue, String> {
        match self {
            PropertyType::Decimal => parse_u32(text).map(PropertyValue::Decimal),
            PropertyType::Hex => {
                let digits = text
                    .strip_prefix("0x")
                    .or_else(|| text.strip_prefix("0X"))
                    .unwrap_or(text);
                u32::from_str_radix(digits, 16)
                    .map(PropertyValue::Hex)
                    .map_err(|e| format!("invalid hex integer {:?}: {}", text, e))
            }
            PropertyType::Mac => parse_mac(text)
                .map(PropertyValue::Mac)
                .ok_or_else(|| format!("invalid MAC address {:?}", text)),
            PropertyType::String => Ok(PropertyValue::String(Bytes::copy_from_slice(text.as_bytes()))),
            PropertyType::Log => Ok(PropertyValue::Log(Bytes::copy_from_slice(text.as_bytes()))),
            PropertyType::ConfigBlob => hex::decode(text)
                .map(|b| PropertyValue::ConfigBlob(Bytes::from(b)))
                .map_err(|e| format!("invalid hex data: {}", e)),
            PropertyType::Binary => hex::decode(text)
                .map(|b| PropertyValue::Binary(Bytes::from(b)))
                .map_err(|e| format!("invalid hex data: {}", e)),
        }
    }
}

fn parse_u32(text: &str) -> Result<u32, String> {
    let parsed = match text.strip_prefix("0x") {
        Some(digits) => u32::from_str_radix(digits, 16),
        None => text.parse(),
    };
    parsed.map_err(|e| format!("invalid integer {:?}: {}", text, e))
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.tag())
    }
}

/// Declarative value constraint attached to a descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Validator {
    /// Integer within `min..=max`.
    Range { min: u32, max: u32 },
    /// Integer from a fixed set.
    OneOf { values: Vec<u32> },
    /// Byte value no longer than `max`.
    MaxLength { max: usize },
}

impl Validator {
    pub fn accepts(&self, value: &PropertyValue) -> bool {
        match self {
            Validator::Range { min, max } => value
                .as_u32()
                .map(|v| (*min..=*max).contains(&v))
                .unwrap_or(false),
            Validator::OneOf { values } => {
                value.as_u32().map(|v| values.contains(&v)).unwrap_or(false)
            }
            Validator::MaxLength { max } => {
                value.as_bytes().map(|b| b.len() <= *max).unwrap_or(false)
            }
        }
    }
}

/// A registry entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyDescriptor {
    pub name: PropertyName,
    pub ty: PropertyType,
    pub description: String,
    pub validator: Option<Validator>,
}

impl PropertyDescriptor {
    /// Decodes raw bytes, then applies the validator.
    pub fn decode(&self, raw: &[u8]) -> Result<PropertyValue, ProtocolError> {
        let value = self.ty.decode(raw).map_err(|reason| self.invalid(reason))?;
        self.check(&value)?;
        Ok(value)
    }

    /// Parses text, then applies the validator.
    pub fn parse_value(&self, text: &str) -> Result<PropertyValue, ProtocolError> {
        let value = self.ty.parse_text(text).map_err(|reason| self.invalid(reason))?;
        self.check(&value)?;
        Ok(value)
    }

    /// Checks that `value` has this descriptor's type and passes its validator.
    pub fn check(&self, value: &PropertyValue) -> Result<(), ProtocolError> {
        if value.property_type() != self.ty {
            return Err(self.invalid(format!(
                "expected a {} value, got {}",
                self.ty,
                value.property_type()
            )));
        }
        if let Some(validator) = &self.validator {
            if !validator.accepts(value) {
                return Err(ProtocolError::Rejected {
                    name: self.name.to_string(),
                    value: value.format(),
                });
            }
        }
        Ok(())
    }

    fn invalid(&self, reason: String) -> ProtocolError {
        ProtocolError::InvalidValue {
            name: self.name.to_string(),
            reason,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TableEntry {
    name: String,
    #[serde(rename = "type")]
    ty: String,
    description: Option<String>,
    #[serde(default)]
    validator: Option<Validator>,
}

/// An ordered, immutable set of property descriptors.
#[derive(Debug, Clone)]
pub struct Registry {
    descriptors: Vec<PropertyDescriptor>,
    index: HashMap<PropertyName, usize>,
}

impl Registry {
    /// Builds a registry, rejecting null and duplicate names.
    pub fn new(descriptors: Vec<PropertyDescriptor>) -> Result<Self, ProtocolError> {
        let mut index = HashMap::with_capacity(descriptors.len());
        for (i, descriptor) in descriptors.iter().enumerate() {
            if descriptor.name.is_null() {
                return Err(ProtocolError::Registry(
                    "the all-zero name is reserved for the terminator".to_string(),
                ));
            }
            if index.insert(descriptor.name, i).is_some() {
                return Err(ProtocolError::Registry(format!(
                    "duplicate property {}",
                    descriptor.name
                )));
            }
        }
        Ok(Self { descriptors, index })
    }

    /// Loads a registry from a YAML property table.
    pub fn from_yaml(table: &str) -> Result<Self, ProtocolError> {
        let entries: Vec<TableEntry> =
            serde_yaml::from_str(table).map_err(|e| ProtocolError::Registry(e.to_string()))?;

        let mut descriptors = Vec::with_capacity(entries.len());
        for entry in entries {
            let name: PropertyName = entry.name.parse().map_err(|_| {
                ProtocolError::Registry(format!("bad name in property table: {:?}", entry.name))
            })?;
            let ty = PropertyType::from_tag(&entry.ty)?;
            let description = entry.description.ok_or_else(|| {
                ProtocolError::Registry(format!("missing description for {}", name))
            })?;
            descriptors.push(PropertyDescriptor {
                name,
                ty,
                description,
                validator: entry.validator,
            });
        }

        Self::new(descriptors)
    }

    /// Loads a registry from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ProtocolError> {
        let path = path.as_ref();
        let table = std::fs::read_to_string(path).map_err(|e| {
            ProtocolError::Registry(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&table)
    }

    /// Loads the built-in table.
    pub fn builtin() -> Result<Self, ProtocolError> {
        Self::from_yaml(BUILTIN_TABLE)
    }

    /// All descriptors in table order.
    pub fn descriptors(&self) -> &[PropertyDescriptor] {
        &self.descriptors
    }

    pub fn descriptor_for(&self, name: &PropertyName) -> Option<&PropertyDescriptor> {
        self.index.get(name).map(|&i| &self.descriptors[i])
    }

    /// Looks a descriptor up by its textual name.
    pub fn lookup(&self, name: &str) -> Result<&PropertyDescriptor, ProtocolError> {
        let parsed: PropertyName = name.parse()?;
        self.descriptor_for(&parsed)
            .ok_or_else(|| ProtocolError::UnknownProperty(name.to_string()))
    }

    /// Creates a value-less property used to request `name`.
    pub fn request(&self, name: &str) -> Result<Property, ProtocolError> {
        let descriptor = self.lookup(name)?;
        Ok(Property::from_parts(descriptor.name, None))
    }

    /// Creates a property holding `value`.
    pub fn property(&self, name: &str, value: PropertyValue) -> Result<Property, ProtocolError> {
        let descriptor = self.lookup(name)?;
        descriptor.check(&value)?;
        Ok(Property::from_parts(descriptor.name, Some(value)))
    }

    /// Parses a textual value for property `name`.
    pub fn parse_value(&self, name: &str, text: &str) -> Result<PropertyValue, ProtocolError> {
        self.lookup(name)?.parse_value(text)
    }

    /// Creates a property from a textual value.
    pub fn parse_property(&self, name: &str, text: &str) -> Result<Property, ProtocolError> {
        let descriptor = self.lookup(name)?;
        let value = descriptor.parse_value(text)?;
        Ok(Property::from_parts(descriptor.name, Some(value)))
    }

    /// Creates a property from a raw element name and value.
    ///
    /// A zero name with a zero value yields the terminator.
    pub fn property_from_raw(&self, name: PropertyName, raw: &[u8]) -> Result<Property, ProtocolError> {
        if name.is_null() && raw == crate::property::NULL_VALUE {
            return Ok(Property::terminator());
        }
        let descriptor = self
            .descriptor_for(&name)
            .ok_or_else(|| ProtocolError::UnknownProperty(name.to_string()))?;
        let value = descriptor.decode(raw)?;
        Ok(Property::from_parts(name, Some(value)))
    }
}

static GLOBAL: OnceLock<Result<Registry, String>> = OnceLock::new();

/// Installs `registry` as the process-wide registry.
///
/// Fails once the process-wide registry has been initialised.
pub fn install(registry: Registry) -> Result<(), ProtocolError> {
    GLOBAL.set(Ok(registry)).map_err(|_| {
        ProtocolError::Registry("property registry is already initialised".to_string())
    })
}

/// Returns the process-wide registry, loading the built-in table on first use.
pub fn global() -> Result<&'static Registry, ProtocolError> {
    GLOBAL
        .get_or_init(|| Registry::builtin().map_err(|e| e.to_string()))
        .as_ref()
        .map_err(|e| ProtocolError::Registry(e.clone()))
}

/// All known descriptors, in table order.
pub fn supported_descriptors() -> Result<&'static [PropertyDescriptor], ProtocolError> {
    Ok(global()?.descriptors())
}

/// The descriptor for `name`, if known.
pub fn descriptor_for(name: &PropertyName) -> Result<Option<&'static PropertyDescriptor>, ProtocolError> {
    Ok(global()?.descriptor_for(name))
}
