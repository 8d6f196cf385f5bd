//! # acp-protocol
//!
//! Wire protocol implementation for ACP, the remote management protocol spoken by
//! network appliance configuration tools.
//!
//! This crate provides:
//! - The fixed 128-byte message header with Adler-32 header and body checksums
//! - Property element framing and the typed property value codec
//! - The process-wide property descriptor registry
//! - Header key derivation from the device password
//!
//! Nothing in this crate performs I/O; see `acp-client` for the session and driver.

pub mod error;
pub mod keystream;
pub mod message;
pub mod property;
pub mod registry;

pub use error::{ErrorKind, ProtocolError};
pub use keystream::{derive_header_key, derive_keystream, HEADER_KEY_SIZE};
pub use message::{
    compose_get_property_request, compose_set_property_request, Message, MessageHeader,
    HEADER_SIZE, MAGIC,
};
pub use property::{
    compose_raw_element, Property, PropertyElementHeader, PropertyName, PropertyValue,
    ELEMENT_HEADER_SIZE,
};
pub use registry::{PropertyDescriptor, PropertyType, Registry, Validator};

/// Default TCP port of the ACP service.
pub const DEFAULT_PORT: u16 = 5009;

/// Maximum accepted property element value size (16 MiB).
pub const MAX_ELEMENT_SIZE: u32 = 16 * 1024 * 1024;

/// Computes the Adler-32 checksum of `data` as the signed value carried on the wire.
pub fn adler32(data: &[u8]) -> i32 {
    adler2::adler32_slice(data) as i32
}
