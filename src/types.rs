use bytes::Bytes;
use num_enum::TryFromPrimitive;
use thiserror::Error;

/// Upper bound of MQTT's base-128 variable-byte integer encoding.
pub const VARIABLE_BYTE_INT_MAX: u32 = 268_435_455;

#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive)]
pub enum ProtocolVersion {
    V311 = 4,
    V500 = 5,
}

#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive)]
pub enum PacketType {
    Connect = 1,
    ConnectAck = 2,
    Publish = 3,
    PublishAck = 4,
    PublishReceived = 5,
    PublishRelease = 6,
    PublishComplete = 7,
    Subscribe = 8,
    SubscribeAck = 9,
    Unsubscribe = 10,
    UnsubscribeAck = 11,
    PingRequest = 12,
    PingResponse = 13,
    Disconnect = 14,
    Authenticate = 15,
}

/// `Ord` follows the numeric level, so granting `min(requested,
/// supported)` works directly.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, TryFromPrimitive)]
pub enum QoS {
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive)]
pub enum RetainHandling {
    SendAtSubscribeTime = 0,
    SendAtSubscribeTimeIfNonexistent = 1,
    DoNotSend = 2,
}

#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive)]
pub enum ConnectReason {
    Success = 0,
    UnspecifiedError = 128,
    MalformedPacket = 129,
    ProtocolError = 130,
    ImplementationSpecificError = 131,
    UnsupportedProtocolVersion = 132,
    ClientIdentifierNotValid = 133,
    BadUserNameOrPassword = 134,
    NotAuthorized = 135,
    ServerUnavailable = 136,
    ServerBusy = 137,
    Banned = 138,
    BadAuthenticationMethod = 140,
    TopicNameInvalid = 144,
    PacketTooLarge = 149,
    QuotaExceeded = 151,
    PayloadFormatInvalid = 153,
    RetainNotSupported = 154,
    QosNotSupported = 155,
    UseAnotherServer = 156,
    ServerMoved = 157,
    ConnectionRateExceeded = 159,
}

#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive)]
pub enum PublishAckReason {
    Success = 0,
    NoMatchingSubscribers = 16,
    UnspecifiedError = 128,
    ImplementationSpecificError = 131,
    NotAuthorized = 135,
    TopicNameInvalid = 144,
    PacketIdentifierInUse = 145,
    QuotaExceeded = 151,
    PayloadFormatInvalid = 153,
}

#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive)]
pub enum PublishReceivedReason {
    Success = 0,
    NoMatchingSubscribers = 16,
    UnspecifiedError = 128,
    ImplementationSpecificError = 131,
    NotAuthorized = 135,
    TopicNameInvalid = 144,
    PacketIdentifierInUse = 145,
    QuotaExceeded = 151,
    PayloadFormatInvalid = 153,
}

#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive)]
pub enum PublishReleaseReason {
    Success = 0,
    PacketIdentifierNotFound = 146,
}

#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive)]
pub enum PublishCompleteReason {
    Success = 0,
    PacketIdentifierNotFound = 146,
}

#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive)]
pub enum SubscribeAckReason {
    GrantedQoSZero = 0,
    GrantedQoSOne = 1,
    GrantedQoSTwo = 2,
    UnspecifiedError = 128,
    ImplementationSpecificError = 131,
    NotAuthorized = 135,
    TopicFilterInvalid = 143,
    PacketIdentifierInUse = 145,
    QuotaExceeded = 151,
    SharedSubscriptionsNotSupported = 158,
    SubscriptionIdentifiersNotSupported = 161,
    WildcardSubscriptionsNotSupported = 162,
}

#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive)]
pub enum UnsubscribeAckReason {
    Success = 0,
    NoSubscriptionExisted = 17,
    UnspecifiedError = 128,
    ImplementationSpecificError = 131,
    NotAuthorized = 135,
    TopicFilterInvalid = 143,
    PacketIdentifierInUse = 145,
}

#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive)]
pub enum DisconnectReason {
    NormalDisconnection = 0,
    DisconnectWithWillMessage = 4,
    UnspecifiedError = 128,
    MalformedPacket = 129,
    ProtocolError = 130,
    ImplementationSpecificError = 131,
    NotAuthorized = 135,
    ServerBusy = 137,
    ServerShuttingDown = 139,
    KeepAliveTimeout = 141,
    SessionTakenOver = 142,
    TopicFilterInvalid = 143,
    TopicNameInvalid = 144,
    ReceiveMaximumExceeded = 147,
    TopicAliasInvalid = 148,
    PacketTooLarge = 149,
    MessageRateTooHigh = 150,
    QuotaExceeded = 151,
    AdministrativeAction = 152,
    PayloadFormatInvalid = 153,
    RetainNotSupported = 154,
    QosNotSupported = 155,
    UseAnotherServer = 156,
    ServerMoved = 157,
    SharedSubscriptionNotAvailable = 158,
    ConnectionRateExceeded = 159,
    MaximumConnectTime = 160,
    SubscriptionIdentifiersNotAvailable = 161,
    WildcardSubscriptionsNotAvailable = 162,
}

#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive)]
pub enum AuthenticateReason {
    Success = 0,
    ContinueAuthentication = 24,
    ReAuthenticate = 25,
}

#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, TryFromPrimitive)]
pub enum PropertyId {
    PayloadFormatIndicator = 0x01,
    MessageExpiryInterval = 0x02,
    ContentType = 0x03,
    ResponseTopic = 0x08,
    CorrelationData = 0x09,
    SubscriptionIdentifier = 0x0B,
    SessionExpiryInterval = 0x11,
    AssignedClientIdentifier = 0x12,
    ServerKeepAlive = 0x13,
    AuthenticationMethod = 0x15,
    AuthenticationData = 0x16,
    RequestProblemInformation = 0x17,
    WillDelayInterval = 0x18,
    RequestResponseInformation = 0x19,
    ResponseInformation = 0x1A,
    ServerReference = 0x1C,
    ReasonString = 0x1F,
    ReceiveMaximum = 0x21,
    TopicAliasMaximum = 0x22,
    TopicAlias = 0x23,
    MaximumQos = 0x24,
    RetainAvailable = 0x25,
    UserProperty = 0x26,
    MaximumPacketSize = 0x27,
    WildcardSubscriptionAvailable = 0x28,
    SubscriptionIdentifierAvailable = 0x29,
    SharedSubscriptionAvailable = 0x2A,
}

/// Wire shape of a property value.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PropertyKind {
    Byte,
    TwoByteInt,
    FourByteInt,
    VarByteInt,
    Utf8String,
    Utf8StringPair,
    BinaryData,
}

impl PropertyId {
    /// Every id has exactly one legal value shape.
    pub fn kind(self) -> PropertyKind {
        match self {
            PropertyId::PayloadFormatIndicator
            | PropertyId::RequestProblemInformation
            | PropertyId::RequestResponseInformation
            | PropertyId::MaximumQos
            | PropertyId::RetainAvailable
            | PropertyId::WildcardSubscriptionAvailable
            | PropertyId::SubscriptionIdentifierAvailable
            | PropertyId::SharedSubscriptionAvailable => PropertyKind::Byte,
            PropertyId::ServerKeepAlive
            | PropertyId::ReceiveMaximum
            | PropertyId::TopicAliasMaximum
            | PropertyId::TopicAlias => PropertyKind::TwoByteInt,
            PropertyId::MessageExpiryInterval
            | PropertyId::SessionExpiryInterval
            | PropertyId::WillDelayInterval
            | PropertyId::MaximumPacketSize => PropertyKind::FourByteInt,
            PropertyId::SubscriptionIdentifier => PropertyKind::VarByteInt,
            PropertyId::ContentType
            | PropertyId::ResponseTopic
            | PropertyId::AssignedClientIdentifier
            | PropertyId::AuthenticationMethod
            | PropertyId::ResponseInformation
            | PropertyId::ServerReference
            | PropertyId::ReasonString => PropertyKind::Utf8String,
            PropertyId::UserProperty => PropertyKind::Utf8StringPair,
            PropertyId::CorrelationData | PropertyId::AuthenticationData => {
                PropertyKind::BinaryData
            },
        }
    }

    /// Only USER_PROPERTY and SUBSCRIPTION_IDENTIFIER may occur more
    /// than once in a property section.
    pub fn allows_duplicates(self) -> bool {
        matches!(self, PropertyId::UserProperty | PropertyId::SubscriptionIdentifier)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    Byte(u8),
    TwoByteInt(u16),
    FourByteInt(u32),
    VarByteInt(u32),
    Utf8String(String),
    Utf8StringPair(String, String),
    BinaryData(Bytes),
}

impl PropertyValue {
    pub fn kind(&self) -> PropertyKind {
        match self {
            PropertyValue::Byte(_) => PropertyKind::Byte,
            PropertyValue::TwoByteInt(_) => PropertyKind::TwoByteInt,
            PropertyValue::FourByteInt(_) => PropertyKind::FourByteInt,
            PropertyValue::VarByteInt(_) => PropertyKind::VarByteInt,
            PropertyValue::Utf8String(_) => PropertyKind::Utf8String,
            PropertyValue::Utf8StringPair(_, _) => PropertyKind::Utf8StringPair,
            PropertyValue::BinaryData(_) => PropertyKind::BinaryData,
        }
    }
}

/// Ordered multimap of MQTT 5 properties. Encoding preserves
/// insertion order; equality is order-sensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyList {
    entries: Vec<(PropertyId, PropertyValue)>,
}

impl PropertyList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, id: PropertyId, value: PropertyValue) -> Result<(), ProtocolViolation> {
        if value.kind() != id.kind() {
            return Err(ProtocolViolation::PropertyTypeMismatch(id));
        }

        if !id.allows_duplicates() && self.entries.iter().any(|(existing, _)| *existing == id) {
            return Err(ProtocolViolation::DuplicateProperty(id));
        }

        self.entries.push((id, value));
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &(PropertyId, PropertyValue)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// First value stored under `id`, if any.
    pub fn get(&self, id: PropertyId) -> Option<&PropertyValue> {
        self.entries.iter().find(|(existing, _)| *existing == id).map(|(_, value)| value)
    }

    pub fn byte(&self, id: PropertyId) -> Option<u8> {
        match self.get(id) {
            Some(PropertyValue::Byte(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn u16(&self, id: PropertyId) -> Option<u16> {
        match self.get(id) {
            Some(PropertyValue::TwoByteInt(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn u32(&self, id: PropertyId) -> Option<u32> {
        match self.get(id) {
            Some(PropertyValue::FourByteInt(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn string(&self, id: PropertyId) -> Option<&str> {
        match self.get(id) {
            Some(PropertyValue::Utf8String(value)) => Some(value),
            _ => None,
        }
    }

    pub fn binary(&self, id: PropertyId) -> Option<&Bytes> {
        match self.get(id) {
            Some(PropertyValue::BinaryData(value)) => Some(value),
            _ => None,
        }
    }

    pub fn user_properties(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().filter_map(|(id, value)| match (id, value) {
            (PropertyId::UserProperty, PropertyValue::Utf8StringPair(key, val)) => {
                Some((key.as_str(), val.as_str()))
            },
            _ => None,
        })
    }

    pub fn subscription_identifiers(&self) -> impl Iterator<Item = u32> + '_ {
        self.entries.iter().filter_map(|(id, value)| match (id, value) {
            (PropertyId::SubscriptionIdentifier, PropertyValue::VarByteInt(value)) => Some(*value),
            _ => None,
        })
    }
}

/// Structural violations the decoder or encoder detects in the byte
/// layout itself. The session layer closes the connection on these.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Error)]
pub enum MalformedReason {
    #[error("packet truncated")]
    Truncated,
    #[error("variable byte integer does not terminate within four bytes")]
    BadVariableByteInt,
    #[error("remaining length exceeds 268435455 bytes")]
    PacketTooLarge,
    #[error("property section length exceeds the remaining bytes")]
    PropertyLengthOverflow,
    #[error("unknown property id {0:#04x}")]
    UnknownPropertyId(u8),
    #[error("invalid packet type {0}")]
    InvalidPacketType(u8),
    #[error("invalid protocol version {0}")]
    InvalidProtocolVersion(u8),
    #[error("string is not valid utf-8")]
    InvalidUtf8,
    #[error("invalid quality of service {0}")]
    InvalidQoS(u8),
    #[error("invalid retain handling {0}")]
    InvalidRetainHandling(u8),
    #[error("invalid reason code {0}")]
    InvalidReasonCode(u8),
}

/// Packets that are structurally sound but violate a protocol
/// constraint. Propagated like [`MalformedReason`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    #[error("property {0:?} must not be repeated")]
    DuplicateProperty(PropertyId),
    #[error("value shape does not match property {0:?}")]
    PropertyTypeMismatch(PropertyId),
    #[error("subscription identifier must not be zero")]
    ZeroSubscriptionIdentifier,
    #[error("packet identifier missing for quality of service {0:?}")]
    MissingPacketId(QoS),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("malformed packet: {0}")]
    MalformedPacket(#[from] MalformedReason),
    #[error("protocol error: {0}")]
    ProtocolError(#[from] ProtocolViolation),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastWill {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
    pub properties: PropertyList,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectPacket {
    pub protocol_name: String,
    pub protocol_version: ProtocolVersion,
    pub clean_start: bool,
    pub keep_alive: u16,
    pub properties: PropertyList,
    pub client_id: String,
    pub will: Option<LastWill>,
    pub user_name: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnAckPacket {
    pub session_present: bool,
    pub reason_code: ConnectReason,
    pub properties: PropertyList,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishPacket {
    pub dup: bool,
    pub qos: QoS,
    pub retain: bool,
    pub topic: String,
    pub packet_id: Option<u16>,
    pub properties: PropertyList,
    pub payload: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishAckPacket {
    pub packet_id: u16,
    pub reason_code: PublishAckReason,
    pub properties: PropertyList,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceivedPacket {
    pub packet_id: u16,
    pub reason_code: PublishReceivedReason,
    pub properties: PropertyList,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReleasePacket {
    pub packet_id: u16,
    pub reason_code: PublishReleaseReason,
    pub properties: PropertyList,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishCompletePacket {
    pub packet_id: u16,
    pub reason_code: PublishCompleteReason,
    pub properties: PropertyList,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionRequest {
    pub filter: String,
    pub maximum_qos: QoS,
    pub no_local: bool,
    pub retain_as_published: bool,
    pub retain_handling: RetainHandling,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribePacket {
    pub packet_id: u16,
    pub properties: PropertyList,
    pub subscriptions: Vec<SubscriptionRequest>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeAckPacket {
    pub packet_id: u16,
    pub properties: PropertyList,
    pub reason_codes: Vec<SubscribeAckReason>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsubscribePacket {
    pub packet_id: u16,
    pub properties: PropertyList,
    pub filters: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsubscribeAckPacket {
    pub packet_id: u16,
    pub properties: PropertyList,
    pub reason_codes: Vec<UnsubscribeAckReason>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectPacket {
    pub reason_code: DisconnectReason,
    pub properties: PropertyList,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatePacket {
    pub reason_code: AuthenticateReason,
    pub properties: PropertyList,
}

#[allow(clippy::large_enum_variant)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect(ConnectPacket),
    ConnAck(ConnAckPacket),
    Publish(PublishPacket),
    PublishAck(PublishAckPacket),
    PublishReceived(PublishReceivedPacket),
    PublishRelease(PublishReleasePacket),
    PublishComplete(PublishCompletePacket),
    Subscribe(SubscribePacket),
    SubscribeAck(SubscribeAckPacket),
    Unsubscribe(UnsubscribePacket),
    UnsubscribeAck(UnsubscribeAckPacket),
    PingRequest,
    PingResponse,
    Disconnect(DisconnectPacket),
    Authenticate(AuthenticatePacket),
}

impl Packet {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::Connect(_) => PacketType::Connect,
            Packet::ConnAck(_) => PacketType::ConnectAck,
            Packet::Publish(_) => PacketType::Publish,
            Packet::PublishAck(_) => PacketType::PublishAck,
            Packet::PublishReceived(_) => PacketType::PublishReceived,
            Packet::PublishRelease(_) => PacketType::PublishRelease,
            Packet::PublishComplete(_) => PacketType::PublishComplete,
            Packet::Subscribe(_) => PacketType::Subscribe,
            Packet::SubscribeAck(_) => PacketType::SubscribeAck,
            Packet::Unsubscribe(_) => PacketType::Unsubscribe,
            Packet::UnsubscribeAck(_) => PacketType::UnsubscribeAck,
            Packet::PingRequest => PacketType::PingRequest,
            Packet::PingResponse => PacketType::PingResponse,
            Packet::Disconnect(_) => PacketType::Disconnect,
            Packet::Authenticate(_) => PacketType::Authenticate,
        }
    }

    /// Flag nibble of the fixed header first byte.
    pub fn fixed_header_flags(&self) -> u8 {
        match self {
            Packet::PublishRelease(_) | Packet::Subscribe(_) | Packet::Unsubscribe(_) => {
                0b0000_0010
            },
            Packet::Publish(publish) => {
                let mut flags = (publish.qos as u8) << 1;

                if publish.dup {
                    flags |= 0b0000_1000;
                }

                if publish.retain {
                    flags |= 0b0000_0001;
                }

                flags
            },
            _ => 0b0000_0000,
        }
    }
}
