//! ACP message framing.
//!
//! Header layout (128 bytes, big endian):
//!
//! ```text
//! +--------+---------+-----------------+---------------+-----------+--------+
//! | magic  | version | header_checksum | body_checksum | body_size | flags  |
//! | 4 bytes| 4 bytes |     4 bytes     |    4 bytes    |  4 bytes  | 4 bytes|
//! +--------+---------+-----------------+---------------+-----------+--------+
//! | unused | command | error_code | reserved | key      | reserved           |
//! | 4 bytes| 4 bytes |  4 bytes   | 12 bytes | 32 bytes | 48 bytes           |
//! +--------+---------+------------+----------+----------+--------------------+
//! | body (body_size bytes, absent when body_size == -1)                      |
//! +--------------------------------------------------------------------------+
//! ```
//!
//! All integer fields travel as unsigned 32-bit values and are held here as
//! `i32`; `body_size == -1` marks a header-only frame.

use crate::error::ProtocolError;
use crate::keystream::{derive_header_key, HEADER_KEY_SIZE};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;

/// Magic bytes identifying ACP messages: "acpp"
pub const MAGIC: [u8; 4] = *b"acpp";

/// Size of the message header in bytes.
pub const HEADER_SIZE: usize = 128;

/// Version used for outgoing requests.
pub const REQUEST_VERSION: i32 = 0x0003_0001;

/// Versions accepted when validating a message.
pub const KNOWN_VERSIONS: [i32; 3] = [0x0000_0001, 0x0003_0001, 16_777_984];

/// Get property command code.
pub const CMD_GET_PROPERTY: i32 = 0x14;

/// Set property command code.
pub const CMD_SET_PROPERTY: i32 = 0x15;

/// Commands accepted when validating a message.
pub const KNOWN_COMMANDS: [i32; 13] = [
    1, 3, 4, 5, 6, 0x14, 0x15, 0x16, 0x17, 0x18, 0x19, 0x1a, 0x1b,
];

/// `body_size` of a header-only frame.
pub const NO_BODY: i32 = -1;

/// `body_checksum` of a header-only frame.
pub const NO_BODY_CHECKSUM: i32 = 1;

const HEADER_CHECKSUM_OFFSET: usize = 8;
const RESERVED_AFTER_ERROR: usize = 12;
const RESERVED_AFTER_KEY: usize = 48;

/// A decoded message header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader {
    pub magic: [u8; 4],
    pub version: i32,
    pub header_checksum: i32,
    pub body_checksum: i32,
    pub body_size: i32,
    pub flags: i32,
    pub unused: i32,
    pub command: i32,
    pub error_code: i32,
    pub key: [u8; HEADER_KEY_SIZE],
}

impl MessageHeader {
    /// Creates a header-only request header.
    pub fn new(version: i32, flags: i32, command: i32, key: [u8; HEADER_KEY_SIZE]) -> Self {
        Self {
            magic: MAGIC,
            version,
            header_checksum: 0,
            body_checksum: NO_BODY_CHECKSUM,
            body_size: NO_BODY,
            flags,
            unused: 0,
            command,
            error_code: 0,
            key,
        }
    }

    fn encode_with_checksum(&self, header_checksum: i32) -> BytesMut {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE);

        buf.put_slice(&self.magic);
        buf.put_i32(self.version);
        buf.put_i32(header_checksum);
        buf.put_i32(self.body_checksum);
        buf.put_i32(self.body_size);
        buf.put_i32(self.flags);
        buf.put_i32(self.unused);
        buf.put_i32(self.command);
        buf.put_i32(self.error_code);
        buf.put_bytes(0, RESERVED_AFTER_ERROR);
        buf.put_slice(&self.key);
        buf.put_bytes(0, RESERVED_AFTER_KEY);

        debug_assert_eq!(buf.len(), HEADER_SIZE);
        buf
    }

    /// Computes the checksum this header should carry.
    ///
    /// The checksum covers the serialized header with its own field zeroed.
    pub fn compute_checksum(&self) -> i32 {
        crate::adler32(&self.encode_with_checksum(0))
    }

    /// Serializes the header into exactly 128 bytes.
    ///
    /// The `header_checksum` field of `self` is ignored: the header is first
    /// serialized with a zero checksum, then again with the computed one.
    pub fn compose(&self) -> BytesMut {
        let checksum = self.compute_checksum();
        self.encode_with_checksum(checksum)
    }

    /// Parses a header from exactly 128 bytes without validating it.
    pub fn parse(raw: &[u8]) -> Result<Self, ProtocolError> {
        if raw.len() != HEADER_SIZE {
            return Err(ProtocolError::InvalidHeaderLength {
                expected: HEADER_SIZE,
                actual: raw.len(),
            });
        }

        let mut buf = raw;
        let mut magic = [0u8; 4];
        buf.copy_to_slice(&mut magic);
        let version = buf.get_i32();
        let header_checksum = buf.get_i32();
        let body_checksum = buf.get_i32();
        let body_size = buf.get_i32();
        let flags = buf.get_i32();
        let unused = buf.get_i32();
        let command = buf.get_i32();
        let error_code = buf.get_i32();
        buf.advance(RESERVED_AFTER_ERROR);
        let mut key = [0u8; HEADER_KEY_SIZE];
        buf.copy_to_slice(&mut key);

        Ok(Self {
            magic,
            version,
            header_checksum,
            body_checksum,
            body_size,
            flags,
            unused,
            command,
            error_code,
            key,
        })
    }

    /// Checks the checksum of a raw 128-byte header.
    pub fn verify_checksum(raw: &[u8]) -> Result<(), ProtocolError> {
        let header = Self::parse(raw)?;
        let mut zeroed = raw.to_vec();
        zeroed[HEADER_CHECKSUM_OFFSET..HEADER_CHECKSUM_OFFSET + 4].fill(0);
        let expected = crate::adler32(&zeroed);
        if expected != header.header_checksum {
            return Err(ProtocolError::HeaderChecksumMismatch {
                expected,
                actual: header.header_checksum,
            });
        }
        Ok(())
    }

    /// Returns whether the header announces a header-only frame.
    pub fn is_header_only(&self) -> bool {
        self.body_size == NO_BODY
    }
}

impl fmt::Display for MessageHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ACP message:")?;
        writeln!(f, "  Version:       {:#010x}", self.version)?;
        writeln!(f, "  Body checksum: {}", self.body_checksum)?;
        writeln!(f, "  Body size:     {}", self.body_size)?;
        writeln!(f, "  Flags:         {}", self.flags)?;
        writeln!(f, "  Unused:        {}", self.unused)?;
        writeln!(f, "  Command:       {:#x}", self.command)?;
        writeln!(f, "  Error code:    {}", self.error_code)?;
        write!(f, "  Key:           {}", hex::encode(self.key))
    }
}

/// A header plus optional body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub header: MessageHeader,
    pub body: Option<Bytes>,
}

impl Message {
    /// Creates a message, setting `body_size` and `body_checksum` from `body`.
    ///
    /// Fails when the body does not fit the signed 32-bit size field.
    pub fn new(mut header: MessageHeader, body: Option<Bytes>) -> Result<Self, ProtocolError> {
        match &body {
            Some(body) => {
                header.body_size = body_size_of(body.len())?;
                header.body_checksum = crate::adler32(body);
            }
            None => {
                header.body_size = NO_BODY;
                header.body_checksum = NO_BODY_CHECKSUM;
            }
        }
        Ok(Self { header, body })
    }

    /// Serializes the header followed by the body.
    ///
    /// `body_size` and `body_checksum` are written as they are; use
    /// [`Message::new`] to derive them from the body.
    pub fn compose(&self) -> BytesMut {
        let mut buf = self.header.compose();
        if let Some(body) = &self.body {
            buf.reserve(body.len());
            buf.put_slice(body);
        }
        buf
    }

    /// Splits `raw` into header and body and parses the header.
    ///
    /// Trailing bytes after the header become the body; no trailing bytes
    /// means no body. With `validate` set, [`Message::validate`] runs on the
    /// result.
    pub fn parse(raw: &[u8], validate: bool) -> Result<Self, ProtocolError> {
        if raw.len() < HEADER_SIZE {
            return Err(ProtocolError::InvalidHeaderLength {
                expected: HEADER_SIZE,
                actual: raw.len(),
            });
        }

        let header = MessageHeader::parse(&raw[..HEADER_SIZE])?;
        let trailing = &raw[HEADER_SIZE..];
        let body = if trailing.is_empty() {
            None
        } else {
            Some(Bytes::copy_from_slice(trailing))
        };

        let message = Self { header, body };
        if validate {
            message.validate()?;
        }
        Ok(message)
    }

    /// Checks the header against the known constants and the attached body.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        let header = &self.header;

        if header.magic != MAGIC {
            return Err(ProtocolError::InvalidMagic(header.magic));
        }

        if !KNOWN_VERSIONS.contains(&header.version) {
            return Err(ProtocolError::UnsupportedVersion(header.version));
        }

        if let Some(body) = &self.body {
            if header.is_header_only() {
                return Err(ProtocolError::UnexpectedBody(body.len()));
            }

            if header.body_size as i64 != body.len() as i64 {
                return Err(ProtocolError::BodySizeMismatch {
                    declared: header.body_size,
                    actual: body.len(),
                });
            }

            let expected = crate::adler32(body);
            if header.body_checksum != expected {
                return Err(ProtocolError::BodyChecksumMismatch {
                    expected,
                    actual: header.body_checksum,
                });
            }
        }

        if !KNOWN_COMMANDS.contains(&header.command) {
            return Err(ProtocolError::UnknownCommand(header.command));
        }

        Ok(())
    }
}

fn body_size_of(len: usize) -> Result<i32, ProtocolError> {
    i32::try_from(len).map_err(|_| ProtocolError::BodyTooLarge(len))
}

fn compose_property_request(
    command: i32,
    flags: i32,
    password: &[u8],
    payload: Bytes,
) -> Result<BytesMut, ProtocolError> {
    let header = MessageHeader::new(REQUEST_VERSION, flags, command, derive_header_key(password));
    Ok(Message::new(header, Some(payload))?.compose())
}

/// Composes a serialized get property request carrying `payload`.
pub fn compose_get_property_request(
    flags: i32,
    password: &[u8],
    payload: Bytes,
) -> Result<BytesMut, ProtocolError> {
    compose_property_request(CMD_GET_PROPERTY, flags, password, payload)
}

/// Composes a serialized set property request carrying `payload`.
pub fn compose_set_property_request(
    flags: i32,
    password: &[u8],
    payload: Bytes,
) -> Result<BytesMut, ProtocolError> {
    compose_property_request(CMD_SET_PROPERTY, flags, password, payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const GET_DBUG_HEX: &str = "61637070000300011bef117b17c301a700000010000000040000000000000014000000000000000000000000000000007a5c8b71ad6f324f0cac857d868ab5173e09c835f431657f3c9cb56d969aa50700000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000064627567000000000000000400000000";

    fn dbug_payload() -> Bytes {
        Bytes::from(hex::decode("64627567000000000000000400000000").unwrap())
    }

    fn sample_header() -> MessageHeader {
        MessageHeader::new(REQUEST_VERSION, 4, CMD_GET_PROPERTY, derive_header_key(b"testing"))
    }

    #[test]
    fn test_compose_get_property_request_vector() {
        let message = compose_get_property_request(4, b"testing", dbug_payload()).unwrap();
        assert_eq!(hex::encode(&message), GET_DBUG_HEX);
    }

    #[test]
    fn test_parse_without_validation_vector() {
        let raw = hex::decode(GET_DBUG_HEX).unwrap();
        let message = Message::parse(&raw, false).unwrap();

        assert_eq!(message.header.version, 196609);
        assert_eq!(message.header.flags, 4);
        assert_eq!(message.header.unused, 0);
        assert_eq!(message.header.command, 20);
        assert_eq!(message.header.error_code, 0);
        assert_eq!(message.header.body_size, 16);
        assert_eq!(message.header.body_checksum, 398655911);
        assert_eq!(
            hex::encode(message.header.key),
            "7a5c8b71ad6f324f0cac857d868ab5173e09c835f431657f3c9cb56d969aa507"
        );
        assert_eq!(message.body, Some(dbug_payload()));
    }

    #[test]
    fn test_parse_with_validation_vector() {
        let raw = hex::decode(GET_DBUG_HEX).unwrap();
        assert!(Message::parse(&raw, true).is_ok());
        assert!(MessageHeader::verify_checksum(&raw[..HEADER_SIZE]).is_ok());
    }

    #[test]
    fn test_header_is_always_128_bytes() {
        let header = sample_header();
        assert_eq!(header.compose().len(), HEADER_SIZE);
        let message = Message::new(header, None).unwrap();
        assert_eq!(message.compose().len(), HEADER_SIZE);
    }

    #[test]
    fn test_header_only_sentinels() {
        let message = Message::new(sample_header(), None).unwrap();
        assert_eq!(message.header.body_size, NO_BODY);
        assert_eq!(message.header.body_checksum, NO_BODY_CHECKSUM);

        let raw = message.compose();
        assert_eq!(&raw[16..20], &[0xff, 0xff, 0xff, 0xff]);
        let parsed = Message::parse(&raw, true).unwrap();
        assert_eq!(parsed.header.body_size, -1);
        assert!(parsed.header.is_header_only());
        assert!(parsed.body.is_none());
    }

    #[test]
    fn test_signed_reinterpretation() {
        let mut header = sample_header();
        header.error_code = -6727;
        header.flags = i32::MIN;
        let raw = header.compose();
        assert_eq!(&raw[32..36], &(-6727i32 as u32).to_be_bytes());

        let parsed = MessageHeader::parse(&raw).unwrap();
        assert_eq!(parsed.error_code, -6727);
        assert_eq!(parsed.flags, i32::MIN);
    }

    #[test]
    fn test_parse_header_wrong_length() {
        let result = MessageHeader::parse(&[0u8; 127]);
        assert!(matches!(
            result,
            Err(ProtocolError::InvalidHeaderLength {
                expected: 128,
                actual: 127
            })
        ));
        assert!(MessageHeader::parse(&[0u8; 129]).is_err());
        assert!(Message::parse(&[0u8; 64], false).is_err());
    }

    #[test]
    fn test_validate_bad_magic() {
        let mut raw = Message::new(sample_header(), None).unwrap().compose();
        raw[0..4].copy_from_slice(b"XXXX");
        assert!(matches!(
            Message::parse(&raw, true),
            Err(ProtocolError::InvalidMagic(m)) if &m == b"XXXX"
        ));
        // still inspectable without validation
        assert_eq!(&Message::parse(&raw, false).unwrap().header.magic, b"XXXX");
    }

    #[test]
    fn test_validate_unknown_version() {
        let mut header = sample_header();
        header.version = 0x0003_0002;
        let raw = Message::new(header, None).unwrap().compose();
        assert!(matches!(
            Message::parse(&raw, true),
            Err(ProtocolError::UnsupportedVersion(0x0003_0002))
        ));
    }

    #[test]
    fn test_validate_known_versions() {
        for version in KNOWN_VERSIONS {
            let mut header = sample_header();
            header.version = version;
            let raw = Message::new(header, None).unwrap().compose();
            assert!(Message::parse(&raw, true).is_ok());
        }
    }

    #[test]
    fn test_validate_body_on_header_only_frame() {
        let mut raw = Message::new(sample_header(), None).unwrap().compose();
        raw.extend_from_slice(b"data");
        assert!(matches!(
            Message::parse(&raw, true),
            Err(ProtocolError::UnexpectedBody(4))
        ));
    }

    #[test]
    fn test_validate_body_size_mismatch() {
        let mut message = Message::new(sample_header(), Some(dbug_payload())).unwrap();
        message.header.body_size = 12;
        let raw = message.compose();
        assert!(matches!(
            Message::parse(&raw, true),
            Err(ProtocolError::BodySizeMismatch {
                declared: 12,
                actual: 16
            })
        ));
    }

    #[test]
    fn test_validate_body_checksum_mismatch() {
        let mut raw = Message::new(sample_header(), Some(dbug_payload())).unwrap().compose();
        let last = raw.len() - 1;
        raw[last] ^= 0xff;
        let err = Message::parse(&raw, true).unwrap_err();
        assert!(matches!(err, ProtocolError::BodyChecksumMismatch { .. }));
        assert_eq!(err.kind(), crate::ErrorKind::Checksum);
    }

    #[test]
    fn test_validate_unknown_command() {
        let mut header = sample_header();
        header.command = 0x42;
        let raw = Message::new(header, None).unwrap().compose();
        assert!(matches!(
            Message::parse(&raw, true),
            Err(ProtocolError::UnknownCommand(0x42))
        ));
    }

    #[test]
    fn test_verify_header_checksum_detects_corruption() {
        let mut raw = sample_header().compose();
        raw[30] ^= 0x01;
        assert!(matches!(
            MessageHeader::verify_checksum(&raw),
            Err(ProtocolError::HeaderChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_set_property_request_command() {
        let raw = compose_set_property_request(0, b"testing", dbug_payload()).unwrap();
        let message = Message::parse(&raw, true).unwrap();
        assert_eq!(message.header.command, CMD_SET_PROPERTY);
        assert_eq!(message.header.flags, 0);
        assert_eq!(message.header.key, derive_header_key(b"testing"));
    }

    #[test]
    fn test_body_size_limit() {
        assert_eq!(body_size_of(16).unwrap(), 16);
        assert_eq!(body_size_of(i32::MAX as usize).unwrap(), i32::MAX);

        let too_large = i32::MAX as usize + 1;
        assert!(matches!(
            body_size_of(too_large),
            Err(ProtocolError::BodyTooLarge(len)) if len == too_large
        ));
    }

    #[test]
    fn test_header_display() {
        let text = sample_header().to_string();
        assert!(text.contains("Command:       0x14"));
        assert!(text.contains("7a5c8b71"));
    }

    fn header_strategy() -> impl Strategy<Value = MessageHeader> {
        (
            any::<[u8; 4]>(),
            any::<i32>(),
            any::<i32>(),
            any::<i32>(),
            any::<i32>(),
            any::<i32>(),
            any::<i32>(),
            any::<i32>(),
            any::<[u8; 32]>(),
        )
            .prop_map(
                |(magic, version, body_checksum, body_size, flags, unused, command, error_code, key)| {
                    MessageHeader {
                        magic,
                        version,
                        header_checksum: 0,
                        body_checksum,
                        body_size,
                        flags,
                        unused,
                        command,
                        error_code,
                        key,
                    }
                },
            )
    }

    proptest! {
        #[test]
        fn prop_header_roundtrip(header in header_strategy()) {
            let raw = header.compose();
            let parsed = MessageHeader::parse(&raw).unwrap();

            prop_assert_eq!(parsed.header_checksum, header.compute_checksum());
            let mut expected = header.clone();
            expected.header_checksum = parsed.header_checksum;
            prop_assert_eq!(parsed, expected);
            prop_assert!(MessageHeader::verify_checksum(&raw).is_ok());
        }

        #[test]
        fn prop_body_checksum_law(
            body in prop::collection::vec(any::<u8>(), 1..512),
            size_delta in -2i32..=2,
            checksum_delta in -2i32..=2,
        ) {
            let mut message = Message::new(sample_header(), Some(Bytes::from(body))).unwrap();
            message.header.body_size = message.header.body_size.wrapping_add(size_delta);
            message.header.body_checksum = message.header.body_checksum.wrapping_add(checksum_delta);

            let result = Message::parse(&message.compose(), true);
            let consistent = size_delta == 0 && checksum_delta == 0;
            prop_assert_eq!(result.is_ok(), consistent);
        }
    }
}
