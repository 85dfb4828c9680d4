use crate::types::{
    AuthenticatePacket, AuthenticateReason, CodecError, ConnAckPacket, ConnectPacket,
    ConnectReason, DisconnectPacket, DisconnectReason, LastWill, MalformedReason, Packet,
    PacketType, PropertyId, PropertyKind, PropertyList, PropertyValue, ProtocolViolation,
    ProtocolVersion, PublishAckPacket, PublishAckReason, PublishCompletePacket,
    PublishCompleteReason, PublishPacket, PublishReceivedPacket, PublishReceivedReason,
    PublishReleasePacket,
    PublishReleaseReason, QoS, RetainHandling, SubscribeAckPacket, SubscribeAckReason,
    SubscribePacket, SubscriptionRequest, UnsubscribeAckPacket, UnsubscribeAckReason,
    UnsubscribePacket,
};
use bytes::Bytes;

/// Cursor over an externally owned read buffer. The view is capped
/// at `usable` so a partially filled receive buffer can be decoded
/// up to its high-water mark.
pub struct PacketDecoder<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> PacketDecoder<'a> {
    pub fn new(data: &'a [u8], usable: usize) -> Self {
        PacketDecoder { data: &data[..usable.min(data.len())], offset: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], MalformedReason> {
        if self.remaining() < len {
            return Err(MalformedReason::Truncated);
        }

        let slice = &self.data[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    pub fn decode_byte(&mut self) -> Result<u8, MalformedReason> {
        Ok(self.take(1)?[0])
    }

    pub fn decode_u16(&mut self) -> Result<u16, MalformedReason> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn decode_u32(&mut self) -> Result<u32, MalformedReason> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn decode_variable_int(&mut self) -> Result<u32, MalformedReason> {
        let mut multiplier: u32 = 1;
        let mut value: u32 = 0;

        for _ in 0..4 {
            let byte = self.decode_byte()?;
            value += ((byte & 0b0111_1111) as u32) * multiplier;

            if byte & 0b1000_0000 == 0 {
                return Ok(value);
            }

            multiplier *= 128;
        }

        Err(MalformedReason::BadVariableByteInt)
    }

    pub fn decode_string(&mut self) -> Result<String, MalformedReason> {
        let len = self.decode_u16()? as usize;
        let bytes = self.take(len)?;

        String::from_utf8(bytes.to_vec()).map_err(|_| MalformedReason::InvalidUtf8)
    }

    pub fn decode_binary(&mut self) -> Result<Bytes, MalformedReason> {
        let len = self.decode_u16()? as usize;
        Ok(Bytes::copy_from_slice(self.take(len)?))
    }

    /// Consumes everything up to the usable end (the PUBLISH payload).
    pub fn decode_remaining(&mut self) -> Bytes {
        let bytes = Bytes::copy_from_slice(&self.data[self.offset..]);
        self.offset = self.data.len();
        bytes
    }

    /// Decodes a property section: region length, then id/value pairs
    /// until the region is exhausted.
    pub fn decode_properties(&mut self) -> Result<PropertyList, CodecError> {
        let declared = self.decode_variable_int()? as usize;

        if declared > self.remaining() {
            return Err(MalformedReason::PropertyLengthOverflow.into());
        }

        let region_end = self.offset + declared;
        let mut properties = PropertyList::new();

        while self.offset < region_end {
            let id_byte = self.decode_byte()?;
            let id = PropertyId::try_from(id_byte)
                .map_err(|_| MalformedReason::UnknownPropertyId(id_byte))?;

            let value = match id.kind() {
                PropertyKind::Byte => PropertyValue::Byte(self.decode_byte()?),
                PropertyKind::TwoByteInt => PropertyValue::TwoByteInt(self.decode_u16()?),
                PropertyKind::FourByteInt => PropertyValue::FourByteInt(self.decode_u32()?),
                PropertyKind::VarByteInt => {
                    PropertyValue::VarByteInt(self.decode_variable_int()?)
                },
                PropertyKind::Utf8String => PropertyValue::Utf8String(self.decode_string()?),
                PropertyKind::Utf8StringPair => {
                    let key = self.decode_string()?;
                    let val = self.decode_string()?;
                    PropertyValue::Utf8StringPair(key, val)
                },
                PropertyKind::BinaryData => PropertyValue::BinaryData(self.decode_binary()?),
            };

            if id == PropertyId::SubscriptionIdentifier
                && matches!(value, PropertyValue::VarByteInt(0))
            {
                return Err(ProtocolViolation::ZeroSubscriptionIdentifier.into());
            }

            properties.push(id, value)?;
        }

        // A value that straddles the declared region end means the
        // announced length lied.
        if self.offset != region_end {
            return Err(MalformedReason::PropertyLengthOverflow.into());
        }

        Ok(properties)
    }
}

fn decode_connect(decoder: &mut PacketDecoder) -> Result<Packet, CodecError> {
    let protocol_name = decoder.decode_string()?;
    let protocol_level = decoder.decode_byte()?;
    let protocol_version = ProtocolVersion::try_from(protocol_level)
        .map_err(|_| MalformedReason::InvalidProtocolVersion(protocol_level))?;

    let connect_flags = decoder.decode_byte()?;
    let keep_alive = decoder.decode_u16()?;

    let properties = if protocol_version == ProtocolVersion::V500 {
        decoder.decode_properties()?
    } else {
        PropertyList::new()
    };

    let clean_start = connect_flags & 0b0000_0010 != 0;
    let has_will = connect_flags & 0b0000_0100 != 0;
    let will_qos_val = (connect_flags & 0b0001_1000) >> 3;
    let will_retain = connect_flags & 0b0010_0000 != 0;
    let has_password = connect_flags & 0b0100_0000 != 0;
    let has_user_name = connect_flags & 0b1000_0000 != 0;

    let client_id = decoder.decode_string()?;

    let will = if has_will {
        let will_qos =
            QoS::try_from(will_qos_val).map_err(|_| MalformedReason::InvalidQoS(will_qos_val))?;

        let will_properties = if protocol_version == ProtocolVersion::V500 {
            decoder.decode_properties()?
        } else {
            PropertyList::new()
        };

        let topic = decoder.decode_string()?;
        let payload = decoder.decode_binary()?;

        Some(LastWill { topic, payload, qos: will_qos, retain: will_retain, properties: will_properties })
    } else {
        None
    };

    let user_name = if has_user_name { Some(decoder.decode_string()?) } else { None };
    let password = if has_password { Some(decoder.decode_string()?) } else { None };

    Ok(Packet::Connect(ConnectPacket {
        protocol_name,
        protocol_version,
        clean_start,
        keep_alive,
        properties,
        client_id,
        will,
        user_name,
        password,
    }))
}

fn decode_connack(
    decoder: &mut PacketDecoder,
    protocol_version: ProtocolVersion,
) -> Result<Packet, CodecError> {
    let flags = decoder.decode_byte()?;
    let session_present = flags & 0b0000_0001 != 0;

    let reason_byte = decoder.decode_byte()?;
    let reason_code = ConnectReason::try_from(reason_byte)
        .map_err(|_| MalformedReason::InvalidReasonCode(reason_byte))?;

    let properties = if protocol_version == ProtocolVersion::V500 {
        decoder.decode_properties()?
    } else {
        PropertyList::new()
    };

    Ok(Packet::ConnAck(ConnAckPacket { session_present, reason_code, properties }))
}

fn decode_publish(
    decoder: &mut PacketDecoder,
    first_byte: u8,
    protocol_version: ProtocolVersion,
) -> Result<Packet, CodecError> {
    let dup = first_byte & 0b0000_1000 != 0;
    let qos_val = (first_byte & 0b0000_0110) >> 1;
    let qos = QoS::try_from(qos_val).map_err(|_| MalformedReason::InvalidQoS(qos_val))?;
    let retain = first_byte & 0b0000_0001 != 0;

    let topic = decoder.decode_string()?;

    let packet_id = match qos {
        QoS::AtMostOnce => None,
        QoS::AtLeastOnce | QoS::ExactlyOnce => Some(decoder.decode_u16()?),
    };

    let properties = if protocol_version == ProtocolVersion::V500 {
        decoder.decode_properties()?
    } else {
        PropertyList::new()
    };

    let payload = decoder.decode_remaining();

    Ok(Packet::Publish(PublishPacket { dup, qos, retain, topic, packet_id, properties, payload }))
}

/// PUBACK, PUBREC, PUBREL and PUBCOMP share their shape: a packet id,
/// then an optional reason code and properties. A two-byte body means
/// success with no properties.
fn decode_publish_response<R>(
    decoder: &mut PacketDecoder,
    protocol_version: ProtocolVersion,
    success: R,
    reason: impl Fn(u8) -> Result<R, MalformedReason>,
) -> Result<(u16, R, PropertyList), CodecError> {
    let packet_id = decoder.decode_u16()?;

    if decoder.is_empty() {
        return Ok((packet_id, success, PropertyList::new()));
    }

    let reason_byte = decoder.decode_byte()?;
    let reason_code = reason(reason_byte)?;

    let properties = if protocol_version == ProtocolVersion::V500 && !decoder.is_empty() {
        decoder.decode_properties()?
    } else {
        PropertyList::new()
    };

    Ok((packet_id, reason_code, properties))
}

fn decode_subscribe(
    decoder: &mut PacketDecoder,
    protocol_version: ProtocolVersion,
) -> Result<Packet, CodecError> {
    let packet_id = decoder.decode_u16()?;

    let properties = if protocol_version == ProtocolVersion::V500 {
        decoder.decode_properties()?
    } else {
        PropertyList::new()
    };

    let mut subscriptions = Vec::new();

    while !decoder.is_empty() {
        let filter = decoder.decode_string()?;
        let options = decoder.decode_byte()?;

        let qos_val = options & 0b0000_0011;
        let maximum_qos = QoS::try_from(qos_val).map_err(|_| MalformedReason::InvalidQoS(qos_val))?;

        let retain_handling_val = (options & 0b0011_0000) >> 4;
        let retain_handling = RetainHandling::try_from(retain_handling_val)
            .map_err(|_| MalformedReason::InvalidRetainHandling(retain_handling_val))?;

        subscriptions.push(SubscriptionRequest {
            filter,
            maximum_qos,
            no_local: options & 0b0000_0100 != 0,
            retain_as_published: options & 0b0000_1000 != 0,
            retain_handling,
        });
    }

    Ok(Packet::Subscribe(SubscribePacket { packet_id, properties, subscriptions }))
}

fn decode_subscribe_ack(
    decoder: &mut PacketDecoder,
    protocol_version: ProtocolVersion,
) -> Result<Packet, CodecError> {
    let packet_id = decoder.decode_u16()?;

    let properties = if protocol_version == ProtocolVersion::V500 {
        decoder.decode_properties()?
    } else {
        PropertyList::new()
    };

    let mut reason_codes = Vec::new();

    while !decoder.is_empty() {
        let byte = decoder.decode_byte()?;
        reason_codes.push(
            SubscribeAckReason::try_from(byte)
                .map_err(|_| MalformedReason::InvalidReasonCode(byte))?,
        );
    }

    Ok(Packet::SubscribeAck(SubscribeAckPacket { packet_id, properties, reason_codes }))
}

fn decode_unsubscribe(
    decoder: &mut PacketDecoder,
    protocol_version: ProtocolVersion,
) -> Result<Packet, CodecError> {
    let packet_id = decoder.decode_u16()?;

    let properties = if protocol_version == ProtocolVersion::V500 {
        decoder.decode_properties()?
    } else {
        PropertyList::new()
    };

    let mut filters = Vec::new();

    while !decoder.is_empty() {
        filters.push(decoder.decode_string()?);
    }

    Ok(Packet::Unsubscribe(UnsubscribePacket { packet_id, properties, filters }))
}

fn decode_unsubscribe_ack(
    decoder: &mut PacketDecoder,
    protocol_version: ProtocolVersion,
) -> Result<Packet, CodecError> {
    let packet_id = decoder.decode_u16()?;

    let properties = if protocol_version == ProtocolVersion::V500 {
        decoder.decode_properties()?
    } else {
        PropertyList::new()
    };

    let mut reason_codes = Vec::new();

    while !decoder.is_empty() {
        let byte = decoder.decode_byte()?;
        reason_codes.push(
            UnsubscribeAckReason::try_from(byte)
                .map_err(|_| MalformedReason::InvalidReasonCode(byte))?,
        );
    }

    Ok(Packet::UnsubscribeAck(UnsubscribeAckPacket { packet_id, properties, reason_codes }))
}

fn decode_disconnect(
    decoder: &mut PacketDecoder,
    protocol_version: ProtocolVersion,
) -> Result<Packet, CodecError> {
    if decoder.is_empty() {
        return Ok(Packet::Disconnect(DisconnectPacket {
            reason_code: DisconnectReason::NormalDisconnection,
            properties: PropertyList::new(),
        }));
    }

    let reason_byte = decoder.decode_byte()?;
    let reason_code = DisconnectReason::try_from(reason_byte)
        .map_err(|_| MalformedReason::InvalidReasonCode(reason_byte))?;

    let properties = if protocol_version == ProtocolVersion::V500 && !decoder.is_empty() {
        decoder.decode_properties()?
    } else {
        PropertyList::new()
    };

    Ok(Packet::Disconnect(DisconnectPacket { reason_code, properties }))
}

fn decode_authenticate(
    decoder: &mut PacketDecoder,
    protocol_version: ProtocolVersion,
) -> Result<Packet, CodecError> {
    if decoder.is_empty() {
        return Ok(Packet::Authenticate(AuthenticatePacket {
            reason_code: AuthenticateReason::Success,
            properties: PropertyList::new(),
        }));
    }

    let reason_byte = decoder.decode_byte()?;
    let reason_code = AuthenticateReason::try_from(reason_byte)
        .map_err(|_| MalformedReason::InvalidReasonCode(reason_byte))?;

    let properties = if protocol_version == ProtocolVersion::V500 && !decoder.is_empty() {
        decoder.decode_properties()?
    } else {
        PropertyList::new()
    };

    Ok(Packet::Authenticate(AuthenticatePacket { reason_code, properties }))
}

/// Decodes one packet from `buf[..usable]`.
///
/// Returns `Ok(None)` while the frame is incomplete; the caller
/// resumes with the same buffer once more bytes have arrived. On
/// success, the consumed byte count tells the caller where the
/// leftover input starts.
pub fn decode_packet(
    buf: &[u8],
    usable: usize,
    protocol_version: ProtocolVersion,
) -> Result<Option<(Packet, usize)>, CodecError> {
    let usable = usable.min(buf.len());

    if usable == 0 {
        return Ok(None);
    }

    let first_byte = buf[0];
    let type_val = first_byte >> 4;
    let packet_type = PacketType::try_from(type_val)
        .map_err(|_| MalformedReason::InvalidPacketType(type_val))?;

    // Remaining length. Running out of buffer mid-integer is an
    // incomplete frame; a fourth continuation bit is malformed.
    let mut remaining: usize = 0;
    let mut multiplier: usize = 1;
    let mut header_len = 1;

    loop {
        if header_len == 5 {
            return Err(MalformedReason::BadVariableByteInt.into());
        }

        if header_len >= usable {
            return Ok(None);
        }

        let byte = buf[header_len];
        header_len += 1;
        remaining += ((byte & 0b0111_1111) as usize) * multiplier;

        if byte & 0b1000_0000 == 0 {
            break;
        }

        multiplier *= 128;
    }

    let frame_len = header_len + remaining;

    if usable < frame_len {
        return Ok(None);
    }

    let mut decoder = PacketDecoder::new(&buf[header_len..frame_len], remaining);

    let packet = match packet_type {
        PacketType::Connect => decode_connect(&mut decoder)?,
        PacketType::ConnectAck => decode_connack(&mut decoder, protocol_version)?,
        PacketType::Publish => decode_publish(&mut decoder, first_byte, protocol_version)?,
        PacketType::PublishAck => {
            let (packet_id, reason_code, properties) = decode_publish_response(
                &mut decoder,
                protocol_version,
                PublishAckReason::Success,
                |byte| {
                    PublishAckReason::try_from(byte)
                        .map_err(|_| MalformedReason::InvalidReasonCode(byte))
                },
            )?;
            Packet::PublishAck(PublishAckPacket { packet_id, reason_code, properties })
        },
        PacketType::PublishReceived => {
            let (packet_id, reason_code, properties) = decode_publish_response(
                &mut decoder,
                protocol_version,
                PublishReceivedReason::Success,
                |byte| {
                    PublishReceivedReason::try_from(byte)
                        .map_err(|_| MalformedReason::InvalidReasonCode(byte))
                },
            )?;
            Packet::PublishReceived(PublishReceivedPacket { packet_id, reason_code, properties })
        },
        PacketType::PublishRelease => {
            let (packet_id, reason_code, properties) = decode_publish_response(
                &mut decoder,
                protocol_version,
                PublishReleaseReason::Success,
                |byte| {
                    PublishReleaseReason::try_from(byte)
                        .map_err(|_| MalformedReason::InvalidReasonCode(byte))
                },
            )?;
            Packet::PublishRelease(PublishReleasePacket { packet_id, reason_code, properties })
        },
        PacketType::PublishComplete => {
            let (packet_id, reason_code, properties) = decode_publish_response(
                &mut decoder,
                protocol_version,
                PublishCompleteReason::Success,
                |byte| {
                    PublishCompleteReason::try_from(byte)
                        .map_err(|_| MalformedReason::InvalidReasonCode(byte))
                },
            )?;
            Packet::PublishComplete(PublishCompletePacket { packet_id, reason_code, properties })
        },
        PacketType::Subscribe => decode_subscribe(&mut decoder, protocol_version)?,
        PacketType::SubscribeAck => decode_subscribe_ack(&mut decoder, protocol_version)?,
        PacketType::Unsubscribe => decode_unsubscribe(&mut decoder, protocol_version)?,
        PacketType::UnsubscribeAck => decode_unsubscribe_ack(&mut decoder, protocol_version)?,
        PacketType::PingRequest => Packet::PingRequest,
        PacketType::PingResponse => Packet::PingResponse,
        PacketType::Disconnect => decode_disconnect(&mut decoder, protocol_version)?,
        PacketType::Authenticate => decode_authenticate(&mut decoder, protocol_version)?,
    };

    Ok(Some((packet, frame_len)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_variable_int(bytes: &[u8]) -> Result<u32, MalformedReason> {
        PacketDecoder::new(bytes, bytes.len()).decode_variable_int()
    }

    #[test]
    fn test_decode_variable_int_boundaries() {
        assert_eq!(decode_variable_int(&[0x00]).unwrap(), 0);
        assert_eq!(decode_variable_int(&[0x7F]).unwrap(), 127);
        assert_eq!(decode_variable_int(&[0x80, 0x01]).unwrap(), 128);
        assert_eq!(decode_variable_int(&[0xFF, 0x7F]).unwrap(), 16_383);
        assert_eq!(decode_variable_int(&[0x80, 0x80, 0x01]).unwrap(), 16_384);
        assert_eq!(decode_variable_int(&[0xFF, 0xFF, 0x7F]).unwrap(), 2_097_151);
        assert_eq!(decode_variable_int(&[0x80, 0x80, 0x80, 0x01]).unwrap(), 2_097_152);
        assert_eq!(decode_variable_int(&[0xFF, 0xFF, 0xFF, 0x7F]).unwrap(), 268_435_455);
    }

    #[test]
    fn test_decode_variable_int_rejects_five_bytes() {
        assert_eq!(
            decode_variable_int(&[0xFF, 0xFF, 0xFF, 0xFF, 0x7F]),
            Err(MalformedReason::BadVariableByteInt)
        );
    }

    #[test]
    fn test_decode_variable_int_truncated() {
        assert_eq!(decode_variable_int(&[0x80]), Err(MalformedReason::Truncated));
    }

    #[test]
    fn test_incomplete_frames_return_none() {
        // PINGREQ is two bytes; one byte is not enough.
        let pingreq = [0xC0, 0x00];
        assert!(decode_packet(&pingreq, 1, ProtocolVersion::V311).unwrap().is_none());
        assert!(matches!(
            decode_packet(&pingreq, 2, ProtocolVersion::V311).unwrap(),
            Some((Packet::PingRequest, 2))
        ));

        // A QoS 0 publish whose body has not fully arrived yet.
        let publish = [0x30, 0x05, 0x00, 0x01, b'a', b'x', b'y'];
        for usable in 0..publish.len() {
            assert!(decode_packet(&publish, usable, ProtocolVersion::V311).unwrap().is_none());
        }

        let (packet, consumed) =
            decode_packet(&publish, publish.len(), ProtocolVersion::V311).unwrap().unwrap();
        assert_eq!(consumed, 7);
        match packet {
            Packet::Publish(publish) => {
                assert_eq!(publish.topic, "a");
                assert_eq!(publish.payload.as_ref(), b"xy");
            },
            other => panic!("unexpected packet {:?}", other),
        }
    }

    #[test]
    fn test_malformed_remaining_length() {
        let bytes = [0x30, 0xFF, 0xFF, 0xFF, 0xFF, 0x01];
        assert!(matches!(
            decode_packet(&bytes, bytes.len(), ProtocolVersion::V311),
            Err(CodecError::MalformedPacket(MalformedReason::BadVariableByteInt))
        ));
    }

    #[test]
    fn test_invalid_packet_type() {
        let bytes = [0x00, 0x00];
        assert!(matches!(
            decode_packet(&bytes, bytes.len(), ProtocolVersion::V311),
            Err(CodecError::MalformedPacket(MalformedReason::InvalidPacketType(0)))
        ));
    }

    #[test]
    fn test_truncated_string_inside_frame() {
        // Remaining length says 3, but the topic string announces 9
        // bytes.
        let bytes = [0x30, 0x03, 0x00, 0x09, b'a'];
        assert!(matches!(
            decode_packet(&bytes, bytes.len(), ProtocolVersion::V311),
            Err(CodecError::MalformedPacket(MalformedReason::Truncated))
        ));
    }

    #[test]
    fn test_unknown_property_id() {
        // QoS 0 publish, topic "a", property section [0x7E, 0x00].
        let bytes = [0x30, 0x06, 0x00, 0x01, b'a', 0x02, 0x7E, 0x00];
        assert!(matches!(
            decode_packet(&bytes, bytes.len(), ProtocolVersion::V500),
            Err(CodecError::MalformedPacket(MalformedReason::UnknownPropertyId(0x7E)))
        ));
    }

    #[test]
    fn test_property_section_longer_than_packet() {
        // Property length claims 0x40 bytes, frame ends long before.
        let bytes = [0x30, 0x04, 0x00, 0x01, b'a', 0x40];
        assert!(matches!(
            decode_packet(&bytes, bytes.len(), ProtocolVersion::V500),
            Err(CodecError::MalformedPacket(MalformedReason::PropertyLengthOverflow))
        ));
    }

    #[test]
    fn test_duplicate_property_is_protocol_error() {
        // Two MESSAGE_EXPIRY_INTERVAL properties (id 0x02).
        let bytes = [
            0x30, 0x0E, 0x00, 0x01, b'a', 0x0A, 0x02, 0x00, 0x00, 0x00, 0x1E, 0x02, 0x00, 0x00,
            0x00, 0x3C,
        ];
        assert!(matches!(
            decode_packet(&bytes, bytes.len(), ProtocolVersion::V500),
            Err(CodecError::ProtocolError(ProtocolViolation::DuplicateProperty(
                PropertyId::MessageExpiryInterval
            )))
        ));
    }

    #[test]
    fn test_zero_subscription_identifier_rejected() {
        // SUBSCRIBE with property SUBSCRIPTION_IDENTIFIER = 0.
        let bytes = [0x82, 0x0C, 0x00, 0x01, 0x02, 0x0B, 0x00, 0x00, 0x04, b't', b'e', b's', b't', 0x00];
        assert!(matches!(
            decode_packet(&bytes, bytes.len(), ProtocolVersion::V500),
            Err(CodecError::ProtocolError(ProtocolViolation::ZeroSubscriptionIdentifier))
        ));
    }

    #[test]
    fn test_decode_subscribe() {
        let bytes =
            [0x82, 0x0A, 0x00, 0x01, 0x00, 0x00, 0x04, b't', b'e', b's', b't', 0x00];
        let (packet, consumed) =
            decode_packet(&bytes, bytes.len(), ProtocolVersion::V500).unwrap().unwrap();

        assert_eq!(consumed, bytes.len());
        assert_eq!(
            packet,
            Packet::Subscribe(SubscribePacket {
                packet_id: 1,
                properties: PropertyList::new(),
                subscriptions: vec![SubscriptionRequest {
                    filter: "test".into(),
                    maximum_qos: QoS::AtMostOnce,
                    no_local: false,
                    retain_as_published: false,
                    retain_handling: RetainHandling::SendAtSubscribeTime,
                }],
            })
        );
    }

    #[test]
    fn test_decode_subscribe_with_subscription_identifier() {
        let bytes = [
            0x82, 0x0C, 0xFF, 0xF6, 0x02, 0x0B, 0x01, 0x00, 0x04, b't', b'e', b's', b't', 0x02,
        ];
        let (packet, _) =
            decode_packet(&bytes, bytes.len(), ProtocolVersion::V500).unwrap().unwrap();

        match packet {
            Packet::Subscribe(subscribe) => {
                assert_eq!(subscribe.packet_id, 65_526);
                assert_eq!(
                    subscribe.properties.subscription_identifiers().collect::<Vec<_>>(),
                    vec![1]
                );
                assert_eq!(subscribe.subscriptions[0].maximum_qos, QoS::ExactlyOnce);
            },
            other => panic!("unexpected packet {:?}", other),
        }
    }

    #[test]
    fn test_leftover_offset_allows_pipelined_packets() {
        let mut bytes = vec![0xC0, 0x00]; // PINGREQ
        bytes.extend_from_slice(&[0xD0, 0x00]); // PINGRESP

        let (first, consumed) =
            decode_packet(&bytes, bytes.len(), ProtocolVersion::V311).unwrap().unwrap();
        assert_eq!(first, Packet::PingRequest);
        assert_eq!(consumed, 2);

        let rest = &bytes[consumed..];
        let (second, consumed) =
            decode_packet(rest, rest.len(), ProtocolVersion::V311).unwrap().unwrap();
        assert_eq!(second, Packet::PingResponse);
        assert_eq!(consumed, 2);
    }

    #[test]
    fn test_short_publish_response_defaults_to_success() {
        // Two-byte PUBACK body carries an implicit success reason.
        let bytes = [0x40, 0x02, 0x00, 0x2A];
        let (packet, _) =
            decode_packet(&bytes, bytes.len(), ProtocolVersion::V500).unwrap().unwrap();

        assert_eq!(
            packet,
            Packet::PublishAck(PublishAckPacket {
                packet_id: 42,
                reason_code: PublishAckReason::Success,
                properties: PropertyList::new(),
            })
        );
    }
}
