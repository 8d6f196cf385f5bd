//! Property driver.
//!
//! Sequences framing, the property codec and the session into the two
//! supported operations: bulk property read and single property write.

use crate::error::ClientError;
use crate::session::{Session, SessionConfig};
use acp_protocol::property::decode_error_code;
use acp_protocol::{
    compose_get_property_request, compose_raw_element, compose_set_property_request, Message,
    MessageHeader, Property, PropertyElementHeader, PropertyName, ProtocolError,
    ELEMENT_HEADER_SIZE, HEADER_SIZE, MAX_ELEMENT_SIZE,
};
use bytes::{Bytes, BytesMut};
use std::fmt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Message flags of a get property request.
pub const GET_FLAGS: i32 = 4;

/// Message flags of a set property request.
pub const SET_FLAGS: i32 = 0;

/// A property the device did not deliver.
#[derive(Debug)]
pub enum PropertyFailure {
    /// The device flagged the element with an error code.
    Device { name: PropertyName, code: i32 },
    /// The element arrived but its value was rejected locally.
    Rejected {
        name: PropertyName,
        error: ProtocolError,
    },
}

impl PropertyFailure {
    pub fn name(&self) -> PropertyName {
        match self {
            PropertyFailure::Device { name, .. } | PropertyFailure::Rejected { name, .. } => *name,
        }
    }
}

impl fmt::Display for PropertyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyFailure::Device { name, code } => {
                write!(f, "{}: device error {}", name, code)
            }
            PropertyFailure::Rejected { name, error } => write!(f, "{}: {}", name, error),
        }
    }
}

/// Result of a bulk property read.
#[derive(Debug, Default)]
pub struct PropertyBatch {
    /// Successfully decoded properties, in reply order.
    pub properties: Vec<Property>,
    /// Properties the device failed or that were rejected, in reply order.
    pub failures: Vec<PropertyFailure>,
    /// Non-zero error code of the reply header. No properties are read then.
    pub error_code: Option<i32>,
}

/// Result of a property write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetOutcome {
    Applied,
    /// The reply header carried a non-zero error code.
    MessageError(i32),
    /// The confirmation element carried an error code.
    PropertyError { name: PropertyName, code: i32 },
}

impl SetOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, SetOutcome::Applied)
    }
}

/// Client for one ACP device.
pub struct Client<S = TcpStream> {
    session: Session<S>,
    password: Vec<u8>,
}

impl Client<TcpStream> {
    /// Creates a new client (not yet connected).
    pub fn new(config: SessionConfig, password: impl Into<Vec<u8>>) -> Self {
        Self {
            session: Session::new(config),
            password: password.into(),
        }
    }

    /// Connects to the device.
    pub async fn connect(&mut self) -> Result<(), ClientError> {
        self.session.connect().await
    }
}

impl<S> Client<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Creates a client over an existing session.
    pub fn with_session(session: Session<S>, password: impl Into<Vec<u8>>) -> Self {
        Self {
            session,
            password: password.into(),
        }
    }

    pub fn session(&self) -> &Session<S> {
        &self.session
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    /// Closes the session.
    pub async fn disconnect(&mut self) -> Result<(), ClientError> {
        self.session.close().await
    }

    /// Sends raw bytes.
    pub async fn send(&mut self, data: &[u8]) -> Result<(), ClientError> {
        self.session.send(data).await
    }

    /// Receives exactly `size` raw bytes.
    pub async fn receive(&mut self, size: usize) -> Result<Bytes, ClientError> {
        self.session.receive_exactly(size).await
    }

    /// Receives and validates a reply header.
    ///
    /// A header checksum mismatch is logged but tolerated.
    pub async fn receive_message_header(&mut self) -> Result<MessageHeader, ClientError> {
        let raw = self.receive(HEADER_SIZE).await?;
        if let Err(e) = MessageHeader::verify_checksum(&raw) {
            tracing::warn!("Reply header: {}", e);
        }
        let message = Message::parse(&raw, true)?;
        Ok(message.header)
    }

    /// Receives a property element header.
    pub async fn receive_property_element_header(
        &mut self,
    ) -> Result<PropertyElementHeader, ClientError> {
        let raw = self.receive(ELEMENT_HEADER_SIZE).await?;
        Ok(PropertyElementHeader::parse(&raw)?)
    }

    async fn receive_element(&mut self) -> Result<(PropertyElementHeader, Bytes), ClientError> {
        let header = self.receive_property_element_header().await?;
        if header.size > MAX_ELEMENT_SIZE {
            return Err(ProtocolError::ElementTooLarge {
                size: header.size,
                max: MAX_ELEMENT_SIZE,
            }
            .into());
        }
        let value = self.receive(header.size as usize).await?;
        Ok((header, value))
    }

    /// Reads the named properties.
    ///
    /// Device-side failures and locally rejected values do not abort the
    /// read; they are collected in [`PropertyBatch::failures`].
    pub async fn get_properties<N: AsRef<str>>(
        &mut self,
        names: &[N],
    ) -> Result<PropertyBatch, ClientError> {
        let mut payload = BytesMut::new();
        for name in names {
            let request = Property::request(name.as_ref())?;
            payload.extend_from_slice(&compose_raw_element(0, &request));
        }

        let request = compose_get_property_request(GET_FLAGS, &self.password, payload.freeze())?;
        self.send(&request).await?;

        let mut batch = PropertyBatch::default();

        let header = self.receive_message_header().await?;
        if header.error_code != 0 {
            tracing::warn!("Get properties failed with error code {}", header.error_code);
            batch.error_code = Some(header.error_code);
            return Ok(batch);
        }

        loop {
            let (element, value) = self.receive_element().await?;

            if element.is_error() {
                let code = decode_error_code(&value)?;
                tracing::warn!(
                    "Error requesting value for property {}: {}",
                    element.name,
                    code
                );
                batch.failures.push(PropertyFailure::Device {
                    name: element.name,
                    code,
                });
                continue;
            }

            match Property::from_raw(element.name, &value) {
                Ok(property) if property.is_terminator() => break,
                Ok(property) => {
                    tracing::debug!("Received {}", element.name);
                    batch.properties.push(property);
                }
                Err(e) if e.is_property_scoped() => {
                    tracing::warn!("Rejected property {}: {}", element.name, e);
                    batch.failures.push(PropertyFailure::Rejected {
                        name: element.name,
                        error: e,
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(batch)
    }

    /// Writes properties to the device.
    ///
    /// The device acknowledges with a single confirmation element, so only
    /// one outcome is reported however many properties are sent.
    pub async fn set_properties(&mut self, properties: &[Property]) -> Result<SetOutcome, ClientError> {
        let mut payload = BytesMut::new();
        for property in properties {
            if property.value().is_none() {
                let name = property.name().unwrap_or(PropertyName::NULL);
                return Err(ProtocolError::InvalidValue {
                    name: name.to_string(),
                    reason: "no value to set".to_string(),
                }
                .into());
            }
            payload.extend_from_slice(&compose_raw_element(0, property));
        }

        let request = compose_set_property_request(SET_FLAGS, &self.password, payload.freeze())?;
        self.send(&request).await?;

        let header = self.receive_message_header().await?;
        if header.error_code != 0 {
            tracing::warn!("Set properties failed with error code {}", header.error_code);
            return Ok(SetOutcome::MessageError(header.error_code));
        }

        let (element, value) = self.receive_element().await?;
        if element.is_error() {
            let code = decode_error_code(&value)?;
            tracing::warn!("Error setting value for property {}: {}", element.name, code);
            return Ok(SetOutcome::PropertyError {
                name: element.name,
                code,
            });
        }

        Ok(SetOutcome::Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use acp_protocol::message::{CMD_GET_PROPERTY, CMD_SET_PROPERTY, REQUEST_VERSION};
    use acp_protocol::{derive_header_key, PropertyValue};
    use std::time::Duration;
    use tokio_test::io::Builder;

    const GET_DBUG_HEX: &str = "61637070000300011bef117b17c301a700000010000000040000000000000014000000000000000000000000000000007a5c8b71ad6f324f0cac857d868ab5173e09c835f431657f3c9cb56d969aa50700000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000064627567000000000000000400000000";

    fn reply_header(command: i32, error_code: i32) -> Vec<u8> {
        let mut header = MessageHeader::new(REQUEST_VERSION, 0, command, [0u8; 32]);
        header.error_code = error_code;
        header.compose().to_vec()
    }

    fn element(name: &str, flags: u32, value: &[u8]) -> Vec<u8> {
        let name: PropertyName = name.parse().unwrap();
        let mut raw = PropertyElementHeader::new(name, flags, value.len() as u32)
            .compose()
            .to_vec();
        raw.extend_from_slice(value);
        raw
    }

    fn terminator() -> Vec<u8> {
        hex::decode("00000000000000000000000400000000").unwrap()
    }

    fn client(mock: tokio_test::io::Mock) -> Client<tokio_test::io::Mock> {
        let config = SessionConfig::new("10.0.1.1", 5009).with_read_timeout(Duration::from_secs(1));
        Client::with_session(Session::from_stream(config, mock), "testing")
    }

    #[tokio::test]
    async fn test_get_single_property() {
        let request = hex::decode(GET_DBUG_HEX).unwrap();
        let mock = Builder::new()
            .write(&request)
            .read(&reply_header(CMD_GET_PROPERTY, 0))
            .read(&element("dbug", 0, &[0, 0, 0x30, 0]))
            .read(&terminator())
            .build();

        let mut client = client(mock);
        let batch = client.get_properties(&["dbug"]).await.unwrap();

        assert_eq!(batch.error_code, None);
        assert!(batch.failures.is_empty());
        assert_eq!(batch.properties.len(), 1);
        assert_eq!(batch.properties[0].to_string(), "dbug: 0x3000");
    }

    #[tokio::test]
    async fn test_get_collects_device_errors() {
        let payload = [
            element("syNm", 0, &[0; 4]),
            element("raCh", 0, &[0; 4]),
            element("waMA", 0, &[0; 4]),
        ]
        .concat();
        let request =
            compose_get_property_request(GET_FLAGS, b"testing", Bytes::from(payload)).unwrap();

        let mut reply = reply_header(CMD_GET_PROPERTY, 0);
        reply.extend(element("syNm", 0, b"Base Station"));
        reply.extend(element("raCh", 1, &(-10i32).to_be_bytes()));
        reply.extend(element("waMA", 0, &[0x00, 0x1f, 0x5b, 0xaa, 0x0b, 0xcc]));
        reply.extend(terminator());

        let mock = Builder::new().write(&request).read(&reply).build();
        let mut client = client(mock);
        let batch = client
            .get_properties(&["syNm", "raCh", "waMA"])
            .await
            .unwrap();

        let rendered: Vec<String> = batch.properties.iter().map(|p| p.to_string()).collect();
        assert_eq!(rendered, ["syNm: Base Station", "waMA: 00:1f:5b:aa:0b:cc"]);

        assert_eq!(batch.failures.len(), 1);
        assert!(matches!(
            batch.failures[0],
            PropertyFailure::Device { code: -10, .. }
        ));
        assert_eq!(batch.failures[0].name().to_string(), "raCh");
    }

    #[tokio::test]
    async fn test_get_collects_rejected_values() {
        let payload = element("raCh", 0, &[0; 4]);
        let request =
            compose_get_property_request(GET_FLAGS, b"testing", Bytes::from(payload)).unwrap();

        let mock = Builder::new()
            .write(&request)
            .read(&reply_header(CMD_GET_PROPERTY, 0))
            .read(&element("raCh", 0, &[0, 0, 1, 0]))
            .read(&element("zzzz", 0, &[1]))
            .read(&terminator())
            .build();

        let mut client = client(mock);
        let batch = client.get_properties(&["raCh"]).await.unwrap();

        assert!(batch.properties.is_empty());
        assert_eq!(batch.failures.len(), 2);
        assert!(matches!(
            &batch.failures[0],
            PropertyFailure::Rejected {
                error: ProtocolError::Rejected { .. },
                ..
            }
        ));
        assert!(matches!(
            &batch.failures[1],
            PropertyFailure::Rejected {
                error: ProtocolError::UnknownProperty(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_get_tolerates_reply_header_checksum_mismatch() {
        let request = hex::decode(GET_DBUG_HEX).unwrap();
        let mut reply = reply_header(CMD_GET_PROPERTY, 0);
        reply[8] ^= 0xff;
        assert!(MessageHeader::verify_checksum(&reply).is_err());

        let mock = Builder::new()
            .write(&request)
            .read(&reply)
            .read(&element("dbug", 0, &[0, 0, 0x30, 0]))
            .read(&terminator())
            .build();

        let mut client = client(mock);
        let batch = client.get_properties(&["dbug"]).await.unwrap();
        assert_eq!(batch.properties.len(), 1);
        assert_eq!(batch.properties[0].to_string(), "dbug: 0x3000");
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn test_get_reply_error_code() {
        let request = hex::decode(GET_DBUG_HEX).unwrap();
        let mock = Builder::new()
            .write(&request)
            .read(&reply_header(CMD_GET_PROPERTY, -6727))
            .build();

        let mut client = client(mock);
        let batch = client.get_properties(&["dbug"]).await.unwrap();
        assert!(batch.properties.is_empty());
        assert_eq!(batch.error_code, Some(-6727));
    }

    #[tokio::test]
    async fn test_get_rejects_bad_reply_header() {
        let request = hex::decode(GET_DBUG_HEX).unwrap();
        let mut reply = reply_header(CMD_GET_PROPERTY, 0);
        reply[..4].copy_from_slice(b"XXXX");

        let mock = Builder::new().write(&request).read(&reply).build();
        let mut client = client(mock);
        let err = client.get_properties(&["dbug"]).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Protocol(ProtocolError::InvalidMagic(_))
        ));
    }

    #[tokio::test]
    async fn test_get_rejects_oversized_element() {
        let request = hex::decode(GET_DBUG_HEX).unwrap();
        let oversized = PropertyElementHeader::new("logm".parse().unwrap(), 0, MAX_ELEMENT_SIZE + 1);

        let mock = Builder::new()
            .write(&request)
            .read(&reply_header(CMD_GET_PROPERTY, 0))
            .read(&oversized.compose())
            .build();

        let mut client = client(mock);
        let err = client.get_properties(&["dbug"]).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Protocol(ProtocolError::ElementTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn test_get_unknown_name_fails_before_sending() {
        let mock = Builder::new().build();
        let mut client = client(mock);
        let err = client.get_properties(&["nope"]).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Protocol(ProtocolError::UnknownProperty(_))
        ));
    }

    #[tokio::test]
    async fn test_set_applied() {
        let property = Property::new("raCh", PropertyValue::Decimal(11)).unwrap();
        let request = compose_set_property_request(
            SET_FLAGS,
            b"testing",
            compose_raw_element(0, &property).freeze(),
        )
        .unwrap();

        let mock = Builder::new()
            .write(&request)
            .read(&reply_header(CMD_SET_PROPERTY, 0))
            .read(&element("raCh", 0, &[0; 4]))
            .build();

        let mut client = client(mock);
        let outcome = client.set_properties(&[property]).await.unwrap();
        assert!(outcome.is_applied());
    }

    #[test]
    fn test_set_request_layout() {
        let property = Property::parse("syNm", "AP").unwrap();
        let request = compose_set_property_request(
            SET_FLAGS,
            b"testing",
            compose_raw_element(0, &property).freeze(),
        )
        .unwrap();

        let parsed = Message::parse(&request, true).unwrap();
        assert_eq!(parsed.header.command, CMD_SET_PROPERTY);
        assert_eq!(parsed.header.flags, 0);
        assert_eq!(parsed.header.key, derive_header_key(b"testing"));
        assert_eq!(
            hex::encode(parsed.body.unwrap()),
            "73794e6d00000000000000024150"
        );
    }

    #[tokio::test]
    async fn test_set_reads_one_confirmation_for_many_properties() {
        let channel = Property::new("raCh", PropertyValue::Decimal(11)).unwrap();
        let power = Property::new("raPo", PropertyValue::Decimal(50)).unwrap();
        let payload = [
            compose_raw_element(0, &channel).to_vec(),
            compose_raw_element(0, &power).to_vec(),
        ]
        .concat();
        let request =
            compose_set_property_request(SET_FLAGS, b"testing", Bytes::from(payload)).unwrap();

        // any read past the single confirmation would hit end of stream
        let mock = Builder::new()
            .write(&request)
            .read(&reply_header(CMD_SET_PROPERTY, 0))
            .read(&element("raCh", 0, &[0; 4]))
            .build();

        let mut client = client(mock);
        let outcome = client.set_properties(&[channel, power]).await.unwrap();
        assert_eq!(outcome, SetOutcome::Applied);
    }

    #[tokio::test]
    async fn test_set_property_error() {
        let property = Property::new("raSt", PropertyValue::Decimal(1)).unwrap();
        let request = compose_set_property_request(
            SET_FLAGS,
            b"testing",
            compose_raw_element(0, &property).freeze(),
        )
        .unwrap();

        let mock = Builder::new()
            .write(&request)
            .read(&reply_header(CMD_SET_PROPERTY, 0))
            .read(&element("raSt", 1, &(-16i32).to_be_bytes()))
            .build();

        let mut client = client(mock);
        let outcome = client.set_properties(&[property]).await.unwrap();
        assert_eq!(
            outcome,
            SetOutcome::PropertyError {
                name: "raSt".parse().unwrap(),
                code: -16
            }
        );
    }

    #[tokio::test]
    async fn test_set_message_error() {
        let property = Property::new("acRB", PropertyValue::Decimal(1)).unwrap();
        let request = compose_set_property_request(
            SET_FLAGS,
            b"testing",
            compose_raw_element(0, &property).freeze(),
        )
        .unwrap();

        let mock = Builder::new()
            .write(&request)
            .read(&reply_header(CMD_SET_PROPERTY, 7))
            .build();

        let mut client = client(mock);
        let outcome = client.set_properties(&[property]).await.unwrap();
        assert_eq!(outcome, SetOutcome::MessageError(7));
    }

    #[tokio::test]
    async fn test_set_requires_value() {
        let mock = Builder::new().build();
        let mut client = client(mock);
        let err = client
            .set_properties(&[Property::request("syNm").unwrap()])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ClientError::Protocol(ProtocolError::InvalidValue { .. })
        ));
    }

    #[tokio::test]
    async fn test_disconnect() {
        let mock = Builder::new().build();
        let mut client = client(mock);
        assert!(client.is_connected());
        client.disconnect().await.unwrap();
        assert!(!client.is_connected());
        assert!(matches!(
            client.send(b"acpp").await,
            Err(ClientError::NotConnected)
        ));
    }
}
