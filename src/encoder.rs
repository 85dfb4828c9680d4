use crate::{
    buffer::SharedBuffer,
    types::{
        CodecError, ConnAckPacket, ConnectPacket, DisconnectPacket, MalformedReason, Packet,
        PropertyList, PropertyValue, ProtocolViolation, ProtocolVersion, PublishPacket, QoS,
        VARIABLE_BYTE_INT_MAX,
    },
};

/// Largest value representable by a variable-byte integer needs four
/// bytes; a full `u32` would need five, which only ever happens on a
/// caller error and is caught before the buffer escapes.
fn variable_byte_int(mut value: u32) -> ([u8; 5], usize) {
    let mut encoded = [0u8; 5];
    let mut len = 0;

    loop {
        let mut byte = (value % 128) as u8;
        value /= 128;

        if value > 0 {
            byte |= 128;
        }

        encoded[len] = byte;
        len += 1;

        if value == 0 {
            break;
        }
    }

    (encoded, len)
}

/// Accumulates a packet into a [`SharedBuffer`]. Length prefixes that
/// are only known once the payload is written are injected with
/// [`SharedBuffer::insert`].
#[derive(Default)]
pub struct PacketEncoder {
    data: SharedBuffer,
}

impl PacketEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn encode_byte(&mut self, value: u8) {
        self.data.append(&[value]);
    }

    pub fn encode_u16(&mut self, value: u16) {
        self.data.append(&value.to_be_bytes());
    }

    pub fn encode_u32(&mut self, value: u32) {
        self.data.append(&value.to_be_bytes());
    }

    /// Writes the packet identifier and stamps it on the buffer so
    /// writers can recover it without re-parsing.
    pub fn encode_packet_id(&mut self, value: u16) {
        self.encode_u16(value);
        self.data.set_packet_id(value);
    }

    pub fn encode_variable_int(&mut self, value: u32) {
        let (encoded, len) = variable_byte_int(value);
        self.data.append(&encoded[..len]);
    }

    pub fn encode_string(&mut self, value: &str) {
        self.encode_u16(value.len() as u16);
        self.data.append(value.as_bytes());
    }

    pub fn encode_binary(&mut self, value: &[u8]) {
        self.encode_u16(value.len() as u16);
        self.data.append(value);
    }

    /// Appends without a length prefix (the PUBLISH payload).
    pub fn encode_raw(&mut self, value: &[u8]) {
        self.data.append(value);
    }

    /// Encodes the property section: all properties first, then the
    /// region length prepended at the region start.
    pub fn encode_properties(&mut self, properties: &PropertyList) {
        let region_start = self.data.len();

        for (id, value) in properties.iter() {
            self.encode_byte(*id as u8);

            match value {
                PropertyValue::Byte(v) => self.encode_byte(*v),
                PropertyValue::TwoByteInt(v) => self.encode_u16(*v),
                PropertyValue::FourByteInt(v) => self.encode_u32(*v),
                PropertyValue::VarByteInt(v) => self.encode_variable_int(*v),
                PropertyValue::Utf8String(s) => self.encode_string(s),
                PropertyValue::Utf8StringPair(key, val) => {
                    self.encode_string(key);
                    self.encode_string(val);
                },
                PropertyValue::BinaryData(b) => self.encode_binary(b),
            }
        }

        let region_len = (self.data.len() - region_start) as u32;
        let (encoded, len) = variable_byte_int(region_len);
        self.data.insert(region_start, &encoded[..len]);
    }

    /// Injects the remaining length after the fixed header byte, once
    /// variable header and payload are in place.
    pub fn insert_remaining_length(&mut self) -> Result<(), MalformedReason> {
        let remaining = self.data.len() - 1;

        if remaining > VARIABLE_BYTE_INT_MAX as usize {
            return Err(MalformedReason::PacketTooLarge);
        }

        let (encoded, len) = variable_byte_int(remaining as u32);
        self.data.insert(1, &encoded[..len]);

        Ok(())
    }

    pub fn finish(self) -> SharedBuffer {
        self.data
    }
}

fn encode_connect(packet: &ConnectPacket, encoder: &mut PacketEncoder) {
    encoder.encode_string(&packet.protocol_name);
    encoder.encode_byte(packet.protocol_version as u8);

    let mut connect_flags: u8 = 0b0000_0000;

    if packet.user_name.is_some() {
        connect_flags |= 0b1000_0000;
    }

    if packet.password.is_some() {
        connect_flags |= 0b0100_0000;
    }

    if let Some(will) = &packet.will {
        connect_flags |= 0b0000_0100;
        connect_flags |= (will.qos as u8) << 3;

        if will.retain {
            connect_flags |= 0b0010_0000;
        }
    }

    if packet.clean_start {
        connect_flags |= 0b0000_0010;
    }

    encoder.encode_byte(connect_flags);
    encoder.encode_u16(packet.keep_alive);

    if packet.protocol_version == ProtocolVersion::V500 {
        encoder.encode_properties(&packet.properties);
    }

    encoder.encode_string(&packet.client_id);

    if let Some(will) = &packet.will {
        if packet.protocol_version == ProtocolVersion::V500 {
            encoder.encode_properties(&will.properties);
        }

        encoder.encode_string(&will.topic);
        encoder.encode_binary(&will.payload);
    }

    if let Some(user_name) = &packet.user_name {
        encoder.encode_string(user_name);
    }

    if let Some(password) = &packet.password {
        encoder.encode_string(password);
    }
}

fn encode_connack(
    packet: &ConnAckPacket,
    encoder: &mut PacketEncoder,
    protocol_version: ProtocolVersion,
) {
    encoder.encode_byte(packet.session_present as u8);
    encoder.encode_byte(packet.reason_code as u8);

    if protocol_version == ProtocolVersion::V500 {
        encoder.encode_properties(&packet.properties);
    }
}

fn encode_publish(
    packet: &PublishPacket,
    encoder: &mut PacketEncoder,
    protocol_version: ProtocolVersion,
) -> Result<(), ProtocolViolation> {
    encoder.encode_string(&packet.topic);

    if packet.qos != QoS::AtMostOnce {
        let packet_id = packet.packet_id.ok_or(ProtocolViolation::MissingPacketId(packet.qos))?;
        encoder.encode_packet_id(packet_id);
    }

    if protocol_version == ProtocolVersion::V500 {
        encoder.encode_properties(&packet.properties);
    }

    encoder.encode_raw(&packet.payload);

    Ok(())
}

/// PUBACK, PUBREC, PUBREL and PUBCOMP share their shape.
fn encode_publish_response(
    packet_id: u16,
    reason_code: u8,
    properties: &PropertyList,
    encoder: &mut PacketEncoder,
    protocol_version: ProtocolVersion,
) {
    encoder.encode_packet_id(packet_id);

    if protocol_version == ProtocolVersion::V500 {
        encoder.encode_byte(reason_code);
        encoder.encode_properties(properties);
    }
}

fn encode_disconnect(
    packet: &DisconnectPacket,
    encoder: &mut PacketEncoder,
    protocol_version: ProtocolVersion,
) {
    if protocol_version == ProtocolVersion::V500 {
        encoder.encode_byte(packet.reason_code as u8);
        encoder.encode_properties(&packet.properties);
    }
}

/// Encodes a packet into a [`SharedBuffer`] ready for a socket
/// writer. Fails when the encoded body exceeds the variable-byte
/// integer range or a required packet identifier is absent.
pub fn encode_packet(
    packet: &Packet,
    protocol_version: ProtocolVersion,
) -> Result<SharedBuffer, CodecError> {
    let mut encoder = PacketEncoder::new();

    let first_byte = ((packet.packet_type() as u8) << 4) | packet.fixed_header_flags();
    encoder.encode_byte(first_byte);

    match packet {
        Packet::Connect(p) => encode_connect(p, &mut encoder),
        Packet::ConnAck(p) => encode_connack(p, &mut encoder, protocol_version),
        Packet::Publish(p) => encode_publish(p, &mut encoder, protocol_version)?,
        Packet::PublishAck(p) => encode_publish_response(
            p.packet_id,
            p.reason_code as u8,
            &p.properties,
            &mut encoder,
            protocol_version,
        ),
        Packet::PublishReceived(p) => encode_publish_response(
            p.packet_id,
            p.reason_code as u8,
            &p.properties,
            &mut encoder,
            protocol_version,
        ),
        Packet::PublishRelease(p) => encode_publish_response(
            p.packet_id,
            p.reason_code as u8,
            &p.properties,
            &mut encoder,
            protocol_version,
        ),
        Packet::PublishComplete(p) => encode_publish_response(
            p.packet_id,
            p.reason_code as u8,
            &p.properties,
            &mut encoder,
            protocol_version,
        ),
        Packet::Subscribe(p) => {
            encoder.encode_packet_id(p.packet_id);

            if protocol_version == ProtocolVersion::V500 {
                encoder.encode_properties(&p.properties);
            }

            for subscription in &p.subscriptions {
                encoder.encode_string(&subscription.filter);

                let mut options = subscription.maximum_qos as u8;
                options |= (subscription.retain_handling as u8) << 4;

                if subscription.retain_as_published {
                    options |= 0b0000_1000;
                }

                if subscription.no_local {
                    options |= 0b0000_0100;
                }

                encoder.encode_byte(options);
            }
        },
        Packet::SubscribeAck(p) => {
            encoder.encode_packet_id(p.packet_id);

            if protocol_version == ProtocolVersion::V500 {
                encoder.encode_properties(&p.properties);
            }

            for code in &p.reason_codes {
                encoder.encode_byte(*code as u8);
            }
        },
        Packet::Unsubscribe(p) => {
            encoder.encode_packet_id(p.packet_id);

            if protocol_version == ProtocolVersion::V500 {
                encoder.encode_properties(&p.properties);
            }

            for filter in &p.filters {
                encoder.encode_string(filter);
            }
        },
        Packet::UnsubscribeAck(p) => {
            encoder.encode_packet_id(p.packet_id);

            if protocol_version == ProtocolVersion::V500 {
                encoder.encode_properties(&p.properties);
            }

            for code in &p.reason_codes {
                encoder.encode_byte(*code as u8);
            }
        },
        Packet::PingRequest | Packet::PingResponse => {},
        Packet::Disconnect(p) => encode_disconnect(p, &mut encoder, protocol_version),
        Packet::Authenticate(p) => {
            encoder.encode_byte(p.reason_code as u8);

            if protocol_version == ProtocolVersion::V500 {
                encoder.encode_properties(&p.properties);
            }
        },
    }

    encoder.insert_remaining_length()?;

    Ok(encoder.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        decoder::decode_packet,
        types::{
            AuthenticatePacket, AuthenticateReason, ConnectReason, DisconnectReason, LastWill,
            PropertyId, PublishAckPacket, PublishAckReason, PublishCompletePacket,
            PublishCompleteReason, PublishReceivedPacket, PublishReceivedReason,
            PublishReleasePacket, PublishReleaseReason, RetainHandling, SubscribeAckPacket,
            SubscribeAckReason, SubscribePacket, SubscriptionRequest, UnsubscribeAckPacket,
            UnsubscribeAckReason, UnsubscribePacket,
        },
    };
    use bytes::Bytes;

    fn roundtrip(packet: Packet, protocol_version: ProtocolVersion) {
        let buffer = encode_packet(&packet, protocol_version).unwrap();
        let (decoded, consumed) =
            decode_packet(buffer.as_slice(), buffer.len(), protocol_version).unwrap().unwrap();

        assert_eq!(consumed, buffer.len());
        assert_eq!(decoded, packet);
    }

    fn encoded_variable_int(value: u32) -> Vec<u8> {
        let mut encoder = PacketEncoder::new();
        encoder.encode_variable_int(value);
        encoder.finish().as_slice().to_vec()
    }

    #[test]
    fn test_variable_int_boundaries() {
        assert_eq!(encoded_variable_int(0), vec![0x00]);
        assert_eq!(encoded_variable_int(127), vec![0x7F]);
        assert_eq!(encoded_variable_int(128), vec![0x80, 0x01]);
        assert_eq!(encoded_variable_int(16_383), vec![0xFF, 0x7F]);
        assert_eq!(encoded_variable_int(16_384), vec![0x80, 0x80, 0x01]);
        assert_eq!(encoded_variable_int(2_097_151), vec![0xFF, 0xFF, 0x7F]);
        assert_eq!(encoded_variable_int(2_097_152), vec![0x80, 0x80, 0x80, 0x01]);
        assert_eq!(encoded_variable_int(268_435_455), vec![0xFF, 0xFF, 0xFF, 0x7F]);
    }

    #[test]
    fn test_publish_fixed_header_byte() {
        // QoS 1 publish: type 3 in the high nibble, qos bits in the
        // low nibble.
        let packet = Packet::Publish(PublishPacket {
            dup: false,
            qos: QoS::AtLeastOnce,
            retain: false,
            topic: "a/b".into(),
            packet_id: Some(42),
            properties: PropertyList::new(),
            payload: Bytes::from_static(&[0xDE, 0xAD]),
        });

        let buffer = encode_packet(&packet, ProtocolVersion::V500).unwrap();
        assert_eq!(buffer.as_slice()[0], 0x32);
        assert_eq!(buffer.packet_id(), 42);
    }

    #[test]
    fn test_qos1_publish_without_packet_id_is_rejected() {
        let packet = Packet::Publish(PublishPacket {
            dup: false,
            qos: QoS::AtLeastOnce,
            retain: false,
            topic: "a/b".into(),
            packet_id: None,
            properties: PropertyList::new(),
            payload: Bytes::new(),
        });

        assert!(matches!(
            encode_packet(&packet, ProtocolVersion::V500),
            Err(CodecError::ProtocolError(ProtocolViolation::MissingPacketId(QoS::AtLeastOnce)))
        ));
    }

    #[test]
    fn test_connect_roundtrip() {
        let mut properties = PropertyList::new();
        properties.push(PropertyId::SessionExpiryInterval, PropertyValue::FourByteInt(120)).unwrap();

        let mut will_properties = PropertyList::new();
        will_properties.push(PropertyId::WillDelayInterval, PropertyValue::FourByteInt(5)).unwrap();

        roundtrip(
            Packet::Connect(ConnectPacket {
                protocol_name: "MQTT".into(),
                protocol_version: ProtocolVersion::V500,
                clean_start: true,
                keep_alive: 60,
                properties,
                client_id: "test_client".into(),
                will: Some(LastWill {
                    topic: "last/will".into(),
                    payload: Bytes::from_static(b"gone"),
                    qos: QoS::AtLeastOnce,
                    retain: true,
                    properties: will_properties,
                }),
                user_name: Some("user".into()),
                password: Some("pass".into()),
            }),
            ProtocolVersion::V500,
        );
    }

    #[test]
    fn test_connect_roundtrip_v311() {
        roundtrip(
            Packet::Connect(ConnectPacket {
                protocol_name: "MQTT".into(),
                protocol_version: ProtocolVersion::V311,
                clean_start: false,
                keep_alive: 30,
                properties: PropertyList::new(),
                client_id: "c1".into(),
                will: None,
                user_name: None,
                password: None,
            }),
            ProtocolVersion::V311,
        );
    }

    #[test]
    fn test_connack_roundtrip() {
        let mut properties = PropertyList::new();
        properties
            .push(PropertyId::AssignedClientIdentifier, PropertyValue::Utf8String("gen-1".into()))
            .unwrap();
        properties.push(PropertyId::ReceiveMaximum, PropertyValue::TwoByteInt(100)).unwrap();
        properties.push(PropertyId::RetainAvailable, PropertyValue::Byte(1)).unwrap();
        properties
            .push(PropertyId::AuthenticationData, PropertyValue::BinaryData(Bytes::from_static(&[0xAB])))
            .unwrap();

        let packet = Packet::ConnAck(ConnAckPacket {
            session_present: true,
            reason_code: ConnectReason::Success,
            properties,
        });

        let buffer = encode_packet(&packet, ProtocolVersion::V500).unwrap();
        let (decoded, _) =
            decode_packet(buffer.as_slice(), buffer.len(), ProtocolVersion::V500).unwrap().unwrap();
        assert_eq!(decoded, packet);

        // The session layer reads decoded properties back through the
        // typed accessors.
        let Packet::ConnAck(connack) = decoded else {
            panic!("expected a connack packet");
        };
        assert_eq!(connack.properties.string(PropertyId::AssignedClientIdentifier), Some("gen-1"));
        assert_eq!(connack.properties.u16(PropertyId::ReceiveMaximum), Some(100));
        assert_eq!(connack.properties.byte(PropertyId::RetainAvailable), Some(1));
        assert_eq!(
            connack.properties.binary(PropertyId::AuthenticationData),
            Some(&Bytes::from_static(&[0xAB]))
        );
    }

    #[test]
    fn test_publish_roundtrip() {
        let mut properties = PropertyList::new();
        properties
            .push(PropertyId::UserProperty, PropertyValue::Utf8StringPair("k".into(), "v".into()))
            .unwrap();
        properties.push(PropertyId::MessageExpiryInterval, PropertyValue::FourByteInt(30)).unwrap();

        roundtrip(
            Packet::Publish(PublishPacket {
                dup: false,
                qos: QoS::AtLeastOnce,
                retain: false,
                topic: "a/b".into(),
                packet_id: Some(42),
                properties,
                payload: Bytes::from_static(&[0xDE, 0xAD]),
            }),
            ProtocolVersion::V500,
        );
    }

    #[test]
    fn test_publish_roundtrip_v311() {
        roundtrip(
            Packet::Publish(PublishPacket {
                dup: true,
                qos: QoS::ExactlyOnce,
                retain: true,
                topic: "sensors/kitchen/temp".into(),
                packet_id: Some(7),
                properties: PropertyList::new(),
                payload: Bytes::from_static(b"21.5"),
            }),
            ProtocolVersion::V311,
        );
    }

    #[test]
    fn test_publish_response_roundtrips() {
        roundtrip(
            Packet::PublishAck(PublishAckPacket {
                packet_id: 1500,
                reason_code: PublishAckReason::Success,
                properties: PropertyList::new(),
            }),
            ProtocolVersion::V500,
        );
        roundtrip(
            Packet::PublishReceived(PublishReceivedPacket {
                packet_id: 1501,
                reason_code: PublishReceivedReason::QuotaExceeded,
                properties: PropertyList::new(),
            }),
            ProtocolVersion::V500,
        );
        roundtrip(
            Packet::PublishRelease(PublishReleasePacket {
                packet_id: 1502,
                reason_code: PublishReleaseReason::Success,
                properties: PropertyList::new(),
            }),
            ProtocolVersion::V500,
        );
        roundtrip(
            Packet::PublishComplete(PublishCompletePacket {
                packet_id: 1503,
                reason_code: PublishCompleteReason::PacketIdentifierNotFound,
                properties: PropertyList::new(),
            }),
            ProtocolVersion::V500,
        );
    }

    #[test]
    fn test_subscribe_roundtrip() {
        let mut properties = PropertyList::new();
        properties.push(PropertyId::SubscriptionIdentifier, PropertyValue::VarByteInt(9)).unwrap();

        roundtrip(
            Packet::Subscribe(SubscribePacket {
                packet_id: 4500,
                properties,
                subscriptions: vec![SubscriptionRequest {
                    filter: "home/+/temp".into(),
                    maximum_qos: QoS::AtLeastOnce,
                    no_local: true,
                    retain_as_published: false,
                    retain_handling: RetainHandling::SendAtSubscribeTimeIfNonexistent,
                }],
            }),
            ProtocolVersion::V500,
        );
    }

    #[test]
    fn test_subscribe_ack_roundtrip() {
        roundtrip(
            Packet::SubscribeAck(SubscribeAckPacket {
                packet_id: 1234,
                properties: PropertyList::new(),
                reason_codes: vec![
                    SubscribeAckReason::GrantedQoSOne,
                    SubscribeAckReason::NotAuthorized,
                ],
            }),
            ProtocolVersion::V500,
        );
    }

    #[test]
    fn test_unsubscribe_roundtrips() {
        roundtrip(
            Packet::Unsubscribe(UnsubscribePacket {
                packet_id: 99,
                properties: PropertyList::new(),
                filters: vec!["a/b".into(), "a/#".into()],
            }),
            ProtocolVersion::V500,
        );
        roundtrip(
            Packet::UnsubscribeAck(UnsubscribeAckPacket {
                packet_id: 99,
                properties: PropertyList::new(),
                reason_codes: vec![
                    UnsubscribeAckReason::Success,
                    UnsubscribeAckReason::NoSubscriptionExisted,
                ],
            }),
            ProtocolVersion::V500,
        );
    }

    #[test]
    fn test_ping_roundtrips() {
        roundtrip(Packet::PingRequest, ProtocolVersion::V311);
        roundtrip(Packet::PingResponse, ProtocolVersion::V500);
    }

    #[test]
    fn test_disconnect_roundtrip() {
        roundtrip(
            Packet::Disconnect(DisconnectPacket {
                reason_code: DisconnectReason::NormalDisconnection,
                properties: PropertyList::new(),
            }),
            ProtocolVersion::V500,
        );
    }

    #[test]
    fn test_authenticate_roundtrip() {
        let mut properties = PropertyList::new();
        properties
            .push(PropertyId::AuthenticationMethod, PropertyValue::Utf8String("SCRAM".into()))
            .unwrap();

        roundtrip(
            Packet::Authenticate(AuthenticatePacket {
                reason_code: AuthenticateReason::ContinueAuthentication,
                properties,
            }),
            ProtocolVersion::V500,
        );
    }

    #[test]
    fn test_packet_id_stamp_on_acks() {
        let packet = Packet::PublishAck(PublishAckPacket {
            packet_id: 777,
            reason_code: PublishAckReason::Success,
            properties: PropertyList::new(),
        });

        let buffer = encode_packet(&packet, ProtocolVersion::V311).unwrap();
        assert_eq!(buffer.packet_id(), 777);
    }
}
