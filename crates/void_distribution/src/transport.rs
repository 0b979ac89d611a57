//! In-process transport
//!
//! Connects routers living in one process through crossbeam channels. Every
//! participant joins a shared [`ChannelNetwork`] and gets a sending half
//! implementing [`PacketSink`] plus a receiver of [`Envelope`]s to feed into
//! its router.

use crate::source::PacketSink;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use void_ir::ParticipantId;

/// Bytes received from a participant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub from: ParticipantId,
    pub bytes: Vec<u8>,
}

/// Set of participants reachable from each other
#[derive(Default)]
pub struct ChannelNetwork {
    peers: Mutex<HashMap<ParticipantId, Sender<Envelope>>>,
}

impl ChannelNetwork {
    /// Create an empty network
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Join the network, replacing an earlier membership of the same ID
    pub fn join(self: &Arc<Self>, id: ParticipantId) -> (ChannelTransport, Receiver<Envelope>) {
        let (tx, rx) = unbounded();
        if self.peers.lock().insert(id, tx).is_some() {
            log::warn!("{} rejoined the network", id);
        }
        let transport = ChannelTransport {
            id,
            network: Arc::clone(self),
        };
        (transport, rx)
    }

    /// Leave the network
    pub fn leave(&self, id: ParticipantId) -> bool {
        self.peers.lock().remove(&id).is_some()
    }

    /// Check if a participant is reachable
    pub fn is_member(&self, id: ParticipantId) -> bool {
        self.peers.lock().contains_key(&id)
    }

    fn deliver(&self, from: ParticipantId, to: ParticipantId, bytes: &[u8]) -> bool {
        let Some(sender) = self.peers.lock().get(&to).cloned() else {
            log::debug!("Dropping {} bytes from {} to unknown {}", bytes.len(), from, to);
            return false;
        };

        let envelope = Envelope {
            from,
            bytes: bytes.to_vec(),
        };
        sender.send(envelope).is_ok()
    }
}

/// Sending half of one participant's network membership
pub struct ChannelTransport {
    id: ParticipantId,
    network: Arc<ChannelNetwork>,
}

impl ChannelTransport {
    /// Participant this transport sends as
    pub fn id(&self) -> ParticipantId {
        self.id
    }
}

impl PacketSink for ChannelTransport {
    fn send(&mut self, participant: ParticipantId, bytes: &[u8]) -> bool {
        self.network.deliver(self.id, participant, bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_between_members() {
        let network = ChannelNetwork::new();
        let (mut a, _a_rx) = network.join(ParticipantId::new(1));
        let (_b, b_rx) = network.join(ParticipantId::new(2));

        assert!(a.send(ParticipantId::new(2), b"hello"));
        let envelope = b_rx.try_recv().unwrap();
        assert_eq!(envelope.from, ParticipantId::new(1));
        assert_eq!(envelope.bytes, b"hello");
    }

    #[test]
    fn test_send_to_unknown_fails() {
        let network = ChannelNetwork::new();
        let (mut a, _rx) = network.join(ParticipantId::new(1));
        assert!(!a.send(ParticipantId::new(3), b"lost"));
    }

    #[test]
    fn test_leave_and_closed_receiver() {
        let network = ChannelNetwork::new();
        let (mut a, _a_rx) = network.join(ParticipantId::new(1));
        let (_b, b_rx) = network.join(ParticipantId::new(2));

        drop(b_rx);
        assert!(!a.send(ParticipantId::new(2), b"closed"));

        assert!(network.leave(ParticipantId::new(2)));
        assert!(!network.is_member(ParticipantId::new(2)));
        assert!(!network.leave(ParticipantId::new(2)));
    }
}
