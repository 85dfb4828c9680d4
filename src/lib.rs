//! Core library of the nioev MQTT broker: topic utilities, the
//! wire codec for MQTT 3.1.1 and 5.0 control packets, the wildcard
//! subscription tree and the worker-task runtime the broker's state
//! machines run on. Connection handling, sessions and persistence
//! are built on top of this crate, not inside it.

pub const TOPIC_SEPARATOR: char = '/';

pub const MULTI_LEVEL_WILDCARD: char = '#';
pub const MULTI_LEVEL_WILDCARD_STR: &str = "#";

pub const SINGLE_LEVEL_WILDCARD: char = '+';
pub const SINGLE_LEVEL_WILDCARD_STR: &str = "+";

/// Topics whose first level starts with this are system topics and
/// never match filters rooted at a wildcard.
pub const SYSTEM_TOPIC_PREFIX: char = '$';

pub const MAX_TOPIC_LEN_BYTES: usize = 65_535;

pub mod buffer;
pub mod decoder;
pub mod encoder;
pub mod topic;
pub mod tree;
pub mod types;
pub mod worker;

#[cfg(feature = "codec")]
pub mod codec {
    use crate::{
        decoder, encoder,
        types::{CodecError, Packet, ProtocolVersion},
    };
    use bytes::{Buf, BytesMut};
    use thiserror::Error;
    use tokio_util::codec::{Decoder, Encoder};

    /// Error surface of the transport adapter: either the codec
    /// rejected the bytes, or the transport underneath failed. This
    /// is the crate's only I/O-adjacent seam; [`CodecError`] itself
    /// has no I/O category.
    #[derive(Debug, Error)]
    pub enum TransportError {
        #[error(transparent)]
        Codec(#[from] CodecError),
        #[error(transparent)]
        Io(#[from] std::io::Error),
    }

    /// Frames MQTT packets over a `tokio_util` transport. Starts out
    /// speaking 3.1.1 and switches to the version a decoded CONNECT
    /// announces.
    pub struct MqttCodec {
        version: ProtocolVersion,
    }

    impl MqttCodec {
        pub fn new() -> Self {
            MqttCodec { version: ProtocolVersion::V311 }
        }

        pub fn version(&self) -> ProtocolVersion {
            self.version
        }
    }

    impl Default for MqttCodec {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Decoder for MqttCodec {
        type Item = Packet;
        type Error = TransportError;

        fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Packet>, TransportError> {
            match decoder::decode_packet(buf, buf.len(), self.version)? {
                Some((packet, consumed)) => {
                    buf.advance(consumed);

                    if let Packet::Connect(connect) = &packet {
                        self.version = connect.protocol_version;
                    }

                    Ok(Some(packet))
                },
                None => Ok(None),
            }
        }
    }

    impl Encoder<Packet> for MqttCodec {
        type Error = TransportError;

        fn encode(&mut self, packet: Packet, buf: &mut BytesMut) -> Result<(), TransportError> {
            let encoded = encoder::encode_packet(&packet, self.version)?;
            buf.extend_from_slice(encoded.as_slice());
            Ok(())
        }
    }

}
