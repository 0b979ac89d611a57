//! Update depacketizer
//!
//! Resumable decoder for the packets of [`UpdatePacketizer`]. A block body may
//! end in any packet, so the decoder keeps the block in progress (kind,
//! declared length, bytes so far) between calls.
//!
//! One instance reconstructs one update at a time and is reused for every
//! update of a connection. After a failure it stays failed until
//! [`UpdateDepacketizer::reset`].
//!
//! [`UpdatePacketizer`]: crate::UpdatePacketizer

use crate::packet::{BlockKind, Trailer, WireResource, BLOCK_HEADER_SIZE, PACKET_OVERHEAD, SEQUENCE_SIZE};
use crate::CodecError;
use void_ir::{DeltaLog, FlushInfo, SceneUpdate};
use void_resource::ResourceHandle;

/// Outcome of processing one packet
#[derive(Debug)]
pub enum DepacketizeResult {
    /// More packets are needed
    Empty,
    /// The packet completed an update
    HasData(SceneUpdate),
    /// The reconstruction failed
    Failed(CodecError),
}

/// Decoder state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepacketizerState {
    /// Waiting for the first packet of an update
    Idle,
    /// Inside an update
    Accumulating,
    /// Reconstruction failed, waiting for reset
    Failed,
}

/// Depacketizer statistics
#[derive(Debug, Clone, Default)]
pub struct DepacketizerStats {
    /// Packets processed
    pub packets_received: u64,
    /// Updates reconstructed
    pub updates_completed: u64,
    /// Reconstructions that failed
    pub updates_failed: u64,
}

/// Block being reassembled
#[derive(Debug)]
struct PartialBlock {
    kind: BlockKind,
    declared: usize,
    body: Vec<u8>,
}

impl PartialBlock {
    fn missing(&self) -> usize {
        self.declared - self.body.len()
    }
}

/// Reassembles scene updates from packets
#[derive(Debug)]
pub struct UpdateDepacketizer {
    state: DepacketizerState,
    next_sequence: u32,
    block: Option<PartialBlock>,
    flush_info: Option<FlushInfo>,
    actions: Option<DeltaLog>,
    resources: Vec<ResourceHandle>,
    stats: DepacketizerStats,
}

impl Default for UpdateDepacketizer {
    fn default() -> Self {
        Self::new()
    }
}

impl UpdateDepacketizer {
    /// Create an idle depacketizer
    pub fn new() -> Self {
        Self {
            state: DepacketizerState::Idle,
            next_sequence: 1,
            block: None,
            flush_info: None,
            actions: None,
            resources: Vec::new(),
            stats: DepacketizerStats::default(),
        }
    }

    /// Current state
    pub fn state(&self) -> DepacketizerState {
        self.state
    }

    /// Get statistics
    pub fn stats(&self) -> &DepacketizerStats {
        &self.stats
    }

    /// Drop any reconstruction in progress and return to idle
    pub fn reset(&mut self) {
        self.state = DepacketizerState::Idle;
        self.clear();
    }

    fn clear(&mut self) {
        self.next_sequence = 1;
        self.block = None;
        self.flush_info = None;
        self.actions = None;
        self.resources.clear();
    }

    /// Process one packet
    pub fn process(&mut self, packet: &[u8]) -> DepacketizeResult {
        self.stats.packets_received += 1;

        if self.state == DepacketizerState::Failed {
            return DepacketizeResult::Failed(CodecError::Malformed(
                "Reconstruction already failed, reset required".into(),
            ));
        }

        match self.process_packet(packet) {
            Ok(Some(update)) => {
                self.stats.updates_completed += 1;
                self.state = DepacketizerState::Idle;
                DepacketizeResult::HasData(update)
            }
            Ok(None) => {
                self.state = DepacketizerState::Accumulating;
                DepacketizeResult::Empty
            }
            Err(e) => {
                log::debug!("Update reconstruction failed: {}", e);
                self.stats.updates_failed += 1;
                self.state = DepacketizerState::Failed;
                self.clear();
                DepacketizeResult::Failed(e)
            }
        }
    }

    fn process_packet(&mut self, packet: &[u8]) -> Result<Option<SceneUpdate>, CodecError> {
        if packet.is_empty() {
            return Err(malformed("Empty packet"));
        }
        if packet.iter().all(|&b| b == 0) {
            return Err(malformed("All-zero packet"));
        }
        if packet.len() < PACKET_OVERHEAD {
            return Err(malformed(format!("Packet of {} bytes is too short", packet.len())));
        }

        let sequence = u32::from_le_bytes([packet[0], packet[1], packet[2], packet[3]]);
        if sequence != self.next_sequence {
            return Err(malformed(format!(
                "Expected packet {}, got {}",
                self.next_sequence, sequence
            )));
        }

        let (payload, trailer) = packet[SEQUENCE_SIZE..].split_at(packet.len() - PACKET_OVERHEAD);
        let trailer = Trailer::from_byte(trailer[0])
            .ok_or_else(|| malformed(format!("Invalid trailer 0x{:02X}", trailer[0])))?;

        self.consume_payload(payload)?;
        self.next_sequence += 1;

        match trailer {
            Trailer::More => Ok(None),
            Trailer::Last => self.finish().map(Some),
        }
    }

    fn consume_payload(&mut self, payload: &[u8]) -> Result<(), CodecError> {
        let mut position = 0;

        while position < payload.len() {
            let rest = &payload[position..];

            match self.block.as_mut() {
                Some(block) => {
                    let take = block.missing().min(rest.len());
                    block.body.extend_from_slice(&rest[..take]);
                    position += take;

                    if block.missing() == 0 {
                        self.finish_block()?;
                    }
                }
                None => {
                    if rest.len() < BLOCK_HEADER_SIZE {
                        return Err(malformed("Block header split across packets"));
                    }
                    let kind = BlockKind::from_tag(rest[0])
                        .ok_or_else(|| malformed(format!("Unknown block tag 0x{:02X}", rest[0])))?;
                    let declared = u32::from_le_bytes([rest[1], rest[2], rest[3], rest[4]]) as usize;
                    self.check_order(kind)?;
                    position += BLOCK_HEADER_SIZE;

                    self.block = Some(PartialBlock {
                        kind,
                        declared,
                        body: Vec::with_capacity(declared.min(payload.len() - position)),
                    });
                    if declared == 0 {
                        self.finish_block()?;
                    }
                }
            }
        }
        Ok(())
    }

    fn check_order(&self, kind: BlockKind) -> Result<(), CodecError> {
        let allowed = match kind {
            BlockKind::FlushInfo => self.flush_info.is_none(),
            BlockKind::Actions => self.flush_info.is_some() && self.actions.is_none(),
            BlockKind::Resource => self.actions.is_some(),
        };
        if allowed {
            Ok(())
        } else {
            Err(malformed(format!("Unexpected {:?} block", kind)))
        }
    }

    fn finish_block(&mut self) -> Result<(), CodecError> {
        let Some(block) = self.block.take() else {
            return Ok(());
        };

        match block.kind {
            BlockKind::FlushInfo => {
                let info: FlushInfo = bincode::deserialize(&block.body)
                    .map_err(|e| malformed(format!("Undecodable flush info: {}", e)))?;
                self.flush_info = Some(info);
            }
            BlockKind::Actions => {
                let actions: DeltaLog = bincode::deserialize(&block.body)
                    .map_err(|e| malformed(format!("Undecodable actions: {}", e)))?;
                if !actions.is_well_formed() {
                    return Err(malformed("Action log offsets out of range"));
                }
                self.actions = Some(actions);
            }
            BlockKind::Resource => {
                let record: WireResource = bincode::deserialize(&block.body)
                    .map_err(|e| malformed(format!("Undecodable resource: {}", e)))?;
                let blob = record.into_blob().map_err(CodecError::Malformed)?;
                self.resources.push(ResourceHandle::detached(blob));
            }
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<SceneUpdate, CodecError> {
        if let Some(block) = &self.block {
            return Err(malformed(format!(
                "{:?} block truncated: {} of {} bytes",
                block.kind,
                block.body.len(),
                block.declared
            )));
        }

        let flush_info = self.flush_info.take().ok_or_else(|| malformed("Update without flush info"))?;
        let actions = self.actions.take().ok_or_else(|| malformed("Update without actions"))?;
        let resources = std::mem::take(&mut self.resources);
        self.clear();

        Ok(SceneUpdate::new(actions, resources, flush_info))
    }
}

fn malformed(message: impl Into<String>) -> CodecError {
    CodecError::Malformed(message.into())
}
