use bytes::Bytes;

/// A complete Ethernet frame in flight between two NICs.
///
/// Frames are immutable once emitted by a stack. Clones share the backing
/// buffer, so handing a copy to a PCAP tap or the DPI engine is free.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    contents: Bytes,
}

impl Frame {
    pub fn new(contents: impl Into<Bytes>) -> Self {
        Self {
            contents: contents.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.contents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.contents
    }
}

impl From<Vec<u8>> for Frame {
    fn from(contents: Vec<u8>) -> Self {
        Self::new(contents)
    }
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        self.bytes()
    }
}
