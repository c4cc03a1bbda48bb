//! Ordered directory of paired peers. Pure data structure; persistence and
//! transport mirroring are orchestrated by [`Node`](crate::Node).

use midilink_protocol::mac::MacAddr;
use midilink_protocol::MAX_PEERS;

use crate::error::NodeError;

/// Marks a persisted peer blob as initialized. Anything else reads as a
/// virgin store.
const VALID_FLAG: u8 = 0xAB;

/// Up to [`MAX_PEERS`] unique MAC addresses in insertion order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PeerDirectory {
    peers: Vec<MacAddr>,
}

impl PeerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a peer. Rejects duplicates and a full table without touching
    /// the existing entries.
    pub fn add(&mut self, mac: MacAddr) -> Result<(), NodeError> {
        if self.peers.contains(&mac) {
            return Err(NodeError::PeerExists);
        }
        if self.peers.len() >= MAX_PEERS {
            return Err(NodeError::PeerTableFull);
        }
        self.peers.push(mac);
        Ok(())
    }

    /// Removes a peer, shifting later entries left. Returns whether the
    /// peer was present.
    pub fn remove(&mut self, mac: &MacAddr) -> bool {
        let before = self.peers.len();
        self.peers.retain(|p| p != mac);
        self.peers.len() != before
    }

    pub fn remove_at(&mut self, index: usize) -> Option<MacAddr> {
        if index < self.peers.len() {
            Some(self.peers.remove(index))
        } else {
            None
        }
    }

    pub fn clear(&mut self) {
        self.peers.clear();
    }

    pub fn get(&self, index: usize) -> Option<&MacAddr> {
        self.peers.get(index)
    }

    pub fn count(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.peers.len() >= MAX_PEERS
    }

    pub fn contains(&self, mac: &MacAddr) -> bool {
        self.peers.contains(mac)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MacAddr> {
        self.peers.iter()
    }

    /// Persisted layout: valid flag, count, then one 6-byte record per peer.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(2 + self.peers.len() * 6);
        buf.push(VALID_FLAG);
        buf.push(self.peers.len() as u8);
        for peer in &self.peers {
            buf.extend_from_slice(&peer.0);
        }
        buf
    }

    /// Rebuilds a directory from a persisted blob. A missing flag or an
    /// impossible count yields an empty directory; a count larger than the
    /// available records is truncated to what is actually there.
    pub fn decode(data: &[u8]) -> Self {
        let mut dir = Self::new();
        if data.len() < 2 || data[0] != VALID_FLAG {
            return dir;
        }
        let count = data[1] as usize;
        if count > MAX_PEERS {
            return dir;
        }
        let records = &data[2..];
        for i in 0..count.min(records.len() / 6) {
            let mut mac = [0u8; 6];
            mac.copy_from_slice(&records[i * 6..i * 6 + 6]);
            // Silently skip duplicates from a tampered blob
            let _ = dir.add(MacAddr(mac));
        }
        dir
    }
}
