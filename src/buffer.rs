use std::sync::Arc;

/// A reference-shared byte container for finished outbound packets.
///
/// Cloning a `SharedBuffer` is O(1) and shares the backing store, so
/// one encoded packet can be handed to many session writers without
/// copying; [`SharedBuffer::deep_copy`] is the explicit deep copy.
/// Mutation goes through [`Arc::make_mut`], so content edits are only
/// cheap while a single handle exists (the encoder's build phase).
///
/// The buffer also carries the packet identifier of the encoded
/// packet (0 when unset) so writers can index retransmission state
/// without re-parsing the bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SharedBuffer {
    packet_id: u16,
    data: Arc<Vec<u8>>,
}

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn append(&mut self, bytes: &[u8]) {
        Arc::make_mut(&mut self.data).extend_from_slice(bytes);
    }

    /// Inserts `bytes` at `offset`, shifting the tail. Used by the
    /// encoder to inject length prefixes once the payload is known.
    ///
    /// Panics when `offset` is past the end of the buffer.
    pub fn insert(&mut self, offset: usize, bytes: &[u8]) {
        let data = Arc::make_mut(&mut self.data);
        assert!(offset <= data.len(), "insert at {} into buffer of length {}", offset, data.len());

        let tail = data.split_off(offset);
        data.extend_from_slice(bytes);
        data.extend_from_slice(&tail);
    }

    /// Allocates a fresh backing store with the same contents and
    /// packet id.
    pub fn deep_copy(&self) -> SharedBuffer {
        SharedBuffer { packet_id: self.packet_id, data: Arc::new(self.data.as_ref().clone()) }
    }

    pub fn packet_id(&self) -> u16 {
        self.packet_id
    }

    pub fn set_packet_id(&mut self, id: u16) {
        self.packet_id = id;
    }
}

impl AsRef<[u8]> for SharedBuffer {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}
