//! Property elements and typed property values.
//!
//! Element layout (12 bytes header + value, big endian):
//!
//! ```text
//! +--------+---------+---------+---------------+
//! | name   | flags   | size    | value         |
//! | 4 bytes| 4 bytes | 4 bytes | size bytes    |
//! +--------+---------+---------+---------------+
//! ```
//!
//! An element whose name and value are both four zero bytes terminates a
//! property enumeration.

use crate::error::ProtocolError;
use crate::registry::{self, PropertyType};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;
use std::str::FromStr;

/// Size of the property element header in bytes.
pub const ELEMENT_HEADER_SIZE: usize = 12;

/// Element flag set by the device when a property could not be retrieved or applied.
pub const ERROR_FLAG: u32 = 1 << 0;

/// Raw value bytes of the terminator element.
pub const NULL_VALUE: [u8; 4] = [0; 4];

/// A four byte property name tag such as `dbug` or `syNm`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PropertyName([u8; 4]);

impl PropertyName {
    /// The all-zero name carried by the terminator element.
    pub const NULL: PropertyName = PropertyName([0; 4]);

    pub const fn from_bytes(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }

    pub fn is_null(&self) -> bool {
        self.0 == [0; 4]
    }
}

impl FromStr for PropertyName {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes: [u8; 4] = s
            .as_bytes()
            .try_into()
            .map_err(|_| ProtocolError::InvalidName(s.to_string()))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for PropertyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.escape_ascii())
    }
}

/// A decoded property value, one variant per property type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    String(Bytes),
    Decimal(u32),
    Hex(u32),
    Log(Bytes),
    Mac([u8; 6]),
    ConfigBlob(Bytes),
    Binary(Bytes),
}

impl PropertyValue {
    /// Returns the property type this value belongs to.
    pub fn property_type(&self) -> PropertyType {
        match self {
            PropertyValue::String(_) => PropertyType::String,
            PropertyValue::Decimal(_) => PropertyType::Decimal,
            PropertyValue::Hex(_) => PropertyType::Hex,
            PropertyValue::Log(_) => PropertyType::Log,
            PropertyValue::Mac(_) => PropertyType::Mac,
            PropertyValue::ConfigBlob(_) => PropertyType::ConfigBlob,
            PropertyValue::Binary(_) => PropertyType::Binary,
        }
    }

    /// Returns the integer of `Decimal` and `Hex` values.
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            PropertyValue::Decimal(v) | PropertyValue::Hex(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the underlying bytes of non-integer values.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            PropertyValue::String(b)
            | PropertyValue::Log(b)
            | PropertyValue::ConfigBlob(b)
            | PropertyValue::Binary(b) => Some(b),
            PropertyValue::Mac(mac) => Some(mac),
            PropertyValue::Decimal(_) | PropertyValue::Hex(_) => None,
        }
    }

    /// Encodes the value into its raw wire bytes.
    pub fn encode(&self) -> Bytes {
        match self {
            PropertyValue::Decimal(v) | PropertyValue::Hex(v) => {
                Bytes::copy_from_slice(&v.to_be_bytes())
            }
            PropertyValue::Mac(mac) => Bytes::copy_from_slice(mac),
            PropertyValue::String(b)
            | PropertyValue::Log(b)
            | PropertyValue::ConfigBlob(b)
            | PropertyValue::Binary(b) => b.clone(),
        }
    }

    /// Renders the value for humans.
    ///
    /// `bin` and `cfb` values render as lowercase hex rather than raw bytes.
    /// `log` values render one trimmed line per record.
    pub fn format(&self) -> String {
        match self {
            PropertyValue::String(b) => String::from_utf8_lossy(b).into_owned(),
            PropertyValue::Decimal(v) => v.to_string(),
            PropertyValue::Hex(v) => format!("{:#x}", v),
            PropertyValue::Log(b) => format_log(b),
            PropertyValue::Mac(mac) => mac
                .iter()
                .map(|b| format!("{:02x}", b))
                .collect::<Vec<_>>()
                .join(":"),
            PropertyValue::ConfigBlob(b) | PropertyValue::Binary(b) => hex::encode(b),
        }
    }
}

fn is_trim_byte(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\r' | b'\0' | 0x0b)
}

fn trim_bytes(mut b: &[u8]) -> &[u8] {
    while let [first, rest @ ..] = b {
        if !is_trim_byte(*first) {
            break;
        }
        b = rest;
    }
    while let [rest @ .., last] = b {
        if !is_trim_byte(*last) {
            break;
        }
        b = rest;
    }
    b
}

/// Log values are NUL separated lines.
fn format_log(raw: &[u8]) -> String {
    trim_bytes(raw)
        .split(|&b| b == 0)
        .map(|line| String::from_utf8_lossy(trim_bytes(line)).into_owned())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parses a colon separated MAC address such as `00:1f:5b:aa:bb:cc`.
pub(crate) fn parse_mac(text: &str) -> Option<[u8; 6]> {
    let mut mac = [0u8; 6];
    let mut parts = text.split(':');
    for slot in mac.iter_mut() {
        let part = parts.next()?;
        if part.len() != 2 {
            return None;
        }
        *slot = u8::from_str_radix(part, 16).ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(mac)
}

/// A named property with an optional value.
///
/// A property without a name is the enumeration terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    name: Option<PropertyName>,
    value: Option<PropertyValue>,
}

impl Property {
    pub(crate) fn from_parts(name: PropertyName, value: Option<PropertyValue>) -> Self {
        Self {
            name: Some(name),
            value,
        }
    }

    /// The enumeration terminator.
    pub fn terminator() -> Self {
        Self {
            name: None,
            value: None,
        }
    }

    pub fn is_terminator(&self) -> bool {
        self.name.is_none() && self.value.is_none()
    }

    pub fn name(&self) -> Option<PropertyName> {
        self.name
    }

    pub fn value(&self) -> Option<&PropertyValue> {
        self.value.as_ref()
    }

    /// Creates a value-less property used to request `name`.
    pub fn request(name: &str) -> Result<Self, ProtocolError> {
        registry::global()?.request(name)
    }

    /// Creates a property holding `value`.
    pub fn new(name: &str, value: PropertyValue) -> Result<Self, ProtocolError> {
        registry::global()?.property(name, value)
    }

    /// Creates a property from a textual value.
    pub fn parse(name: &str, text: &str) -> Result<Self, ProtocolError> {
        registry::global()?.parse_property(name, text)
    }

    /// Creates a property from a raw element name and value.
    pub fn from_raw(name: PropertyName, raw: &[u8]) -> Result<Self, ProtocolError> {
        registry::global()?.property_from_raw(name, raw)
    }

    /// Parses a complete raw element (header followed by value).
    pub fn parse_raw_element(data: &[u8]) -> Result<Self, ProtocolError> {
        let header_bytes = data
            .get(..ELEMENT_HEADER_SIZE)
            .ok_or(ProtocolError::InvalidElementLength {
                expected: ELEMENT_HEADER_SIZE,
                actual: data.len(),
            })?;
        let header = PropertyElementHeader::parse(header_bytes)?;
        if header.size > crate::MAX_ELEMENT_SIZE {
            return Err(ProtocolError::ElementTooLarge {
                size: header.size,
                max: crate::MAX_ELEMENT_SIZE,
            });
        }
        let end = ELEMENT_HEADER_SIZE + header.size as usize;
        let value = data
            .get(ELEMENT_HEADER_SIZE..end)
            .ok_or(ProtocolError::InvalidElementLength {
                expected: end,
                actual: data.len(),
            })?;
        Self::from_raw(header.name, value)
    }

    /// Returns the raw wire value; a property without a value encodes as four zero bytes.
    pub fn encode_value(&self) -> Bytes {
        match &self.value {
            Some(value) => value.encode(),
            None => Bytes::from_static(&NULL_VALUE),
        }
    }

    /// Renders the value for humans; empty when there is no value.
    pub fn format(&self) -> String {
        self.value.as_ref().map(PropertyValue::format).unwrap_or_default()
    }
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.name.unwrap_or(PropertyName::NULL);
        write!(f, "{}: {}", name, self.format())
    }
}

/// The 12-byte header preceding every property value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyElementHeader {
    pub name: PropertyName,
    pub flags: u32,
    pub size: u32,
}

impl PropertyElementHeader {
    pub fn new(name: PropertyName, flags: u32, size: u32) -> Self {
        Self { name, flags, size }
    }

    pub fn compose(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(ELEMENT_HEADER_SIZE);
        buf.put_slice(self.name.as_bytes());
        buf.put_u32(self.flags);
        buf.put_u32(self.size);
        buf
    }

    pub fn parse(raw: &[u8]) -> Result<Self, ProtocolError> {
        if raw.len() != ELEMENT_HEADER_SIZE {
            return Err(ProtocolError::InvalidElementLength {
                expected: ELEMENT_HEADER_SIZE,
                actual: raw.len(),
            });
        }

        let mut buf = raw;
        let mut name = [0u8; 4];
        buf.copy_to_slice(&mut name);
        let flags = buf.get_u32();
        let size = buf.get_u32();

        Ok(Self {
            name: PropertyName(name),
            flags,
            size,
        })
    }

    /// Returns whether the device flagged this element as failed.
    pub fn is_error(&self) -> bool {
        self.flags & ERROR_FLAG != 0
    }
}

/// Composes a raw element for `prop`.
///
/// The terminator composes with a zero name and a zero value.
pub fn compose_raw_element(flags: u32, prop: &Property) -> BytesMut {
    let name = prop.name.unwrap_or(PropertyName::NULL);
    let value = prop.encode_value();

    let mut buf = PropertyElementHeader::new(name, flags, value.len() as u32).compose();
    buf.reserve(value.len());
    buf.put_slice(&value);
    buf
}

/// Decodes the big-endian error code carried by a failed element.
pub fn decode_error_code(value: &[u8]) -> Result<i32, ProtocolError> {
    let code: [u8; 4] = value
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .ok_or(ProtocolError::InvalidElementLength {
            expected: 4,
            actual: value.len(),
        })?;
    Ok(i32::from_be_bytes(code))
}
