//! Update packetizer
//!
//! Writes one [`SceneUpdate`] into a caller-supplied buffer, one packet at a
//! time, handing every finished packet to a callback. The buffer length is
//! the packet capacity.

use crate::packet::{
    BlockKind, Trailer, WireResourceRef, BLOCK_HEADER_SIZE, PACKET_OVERHEAD, SEQUENCE_SIZE, TRAILER_SIZE,
};
use crate::{CodecError, CodecResult};
use void_ir::SceneUpdate;

/// Packetizer statistics
#[derive(Debug, Clone, Default)]
pub struct PacketizerStats {
    /// Updates fully sent
    pub updates_sent: u64,
    /// Packets handed to the callback
    pub packets_sent: u64,
    /// Bytes handed to the callback
    pub bytes_sent: u64,
    /// Updates aborted by the callback
    pub updates_aborted: u64,
}

/// Splits scene updates into packets
#[derive(Debug, Default)]
pub struct UpdatePacketizer {
    stats: PacketizerStats,
}

/// Write cursor over the packet buffer
struct PacketWriter<'a, F> {
    buffer: &'a mut [u8],
    position: usize,
    sequence: u32,
    send: F,
    packets: u64,
    bytes: u64,
}

impl<'a, F: FnMut(&[u8]) -> bool> PacketWriter<'a, F> {
    fn new(buffer: &'a mut [u8], send: F) -> Self {
        Self {
            buffer,
            position: SEQUENCE_SIZE,
            sequence: 1,
            send,
            packets: 0,
            bytes: 0,
        }
    }

    /// Payload bytes left in the current packet
    fn remaining(&self) -> usize {
        self.buffer.len() - TRAILER_SIZE - self.position
    }

    fn write(&mut self, bytes: &[u8]) {
        self.buffer[self.position..self.position + bytes.len()].copy_from_slice(bytes);
        self.position += bytes.len();
    }

    /// Close the current packet and hand it to the callback
    fn emit(&mut self, trailer: Trailer) -> CodecResult<()> {
        self.buffer[..SEQUENCE_SIZE].copy_from_slice(&self.sequence.to_le_bytes());
        self.buffer[self.position] = trailer.byte();
        let len = self.position + TRAILER_SIZE;

        if !(self.send)(&self.buffer[..len]) {
            return Err(CodecError::SendAborted { packet: self.sequence });
        }

        self.packets += 1;
        self.bytes += len as u64;
        self.sequence += 1;
        self.position = SEQUENCE_SIZE;
        Ok(())
    }

    fn write_block(&mut self, kind: BlockKind, body: &[u8]) -> CodecResult<()> {
        let len = u32::try_from(body.len())
            .map_err(|_| CodecError::Serialization(format!("Block of {} bytes too large", body.len())))?;

        if self.remaining() < BLOCK_HEADER_SIZE + 1 {
            self.emit(Trailer::More)?;
        }
        self.write(&[kind.tag()]);
        self.write(&len.to_le_bytes());

        let mut written = 0;
        while written < body.len() {
            if self.remaining() == 0 {
                self.emit(Trailer::More)?;
            }
            let chunk = self.remaining().min(body.len() - written);
            self.write(&body[written..written + chunk]);
            written += chunk;
        }
        Ok(())
    }
}

impl UpdatePacketizer {
    /// Create a packetizer
    pub fn new() -> Self {
        Self::default()
    }

    /// Smallest buffer able to carry `update`
    pub fn minimum_capacity(update: &SceneUpdate) -> CodecResult<usize> {
        let flush_info = bincode::serialized_size(&update.flush_info)? as usize;
        Ok(PACKET_OVERHEAD + BLOCK_HEADER_SIZE + flush_info)
    }

    /// Write `update` into packets of `buffer.len()` bytes
    ///
    /// Every finished packet is passed to `send`. A `false` return stops the
    /// update with [`CodecError::SendAborted`]; packets already passed are
    /// not recalled. Returns the number of packets sent.
    pub fn packetize<F>(&mut self, update: &SceneUpdate, buffer: &mut [u8], send: F) -> CodecResult<u32>
    where
        F: FnMut(&[u8]) -> bool,
    {
        let flush_info = bincode::serialize(&update.flush_info)?;
        let required = PACKET_OVERHEAD + BLOCK_HEADER_SIZE + flush_info.len();
        if buffer.len() < required {
            return Err(CodecError::CapacityTooSmall {
                capacity: buffer.len(),
                required,
            });
        }

        let actions = bincode::serialize(&update.actions)?;
        let mut resources = Vec::with_capacity(update.resources.len());
        for handle in &update.resources {
            let blob = handle
                .blob()
                .ok_or(CodecError::ResourceNotResident(handle.hash()))?;
            resources.push(bincode::serialize(&WireResourceRef::from_blob(&blob))?);
        }

        let mut writer = PacketWriter::new(buffer, send);
        let result = Self::write_update(&mut writer, &flush_info, &actions, &resources);

        self.stats.packets_sent += writer.packets;
        self.stats.bytes_sent += writer.bytes;
        match result {
            Ok(()) => {
                self.stats.updates_sent += 1;
                log::trace!(
                    "Packetized flush {} into {} packets",
                    update.flush_info.flush_counter,
                    writer.packets
                );
                Ok(writer.sequence - 1)
            }
            Err(e) => {
                self.stats.updates_aborted += 1;
                Err(e)
            }
        }
    }

    fn write_update<F: FnMut(&[u8]) -> bool>(
        writer: &mut PacketWriter<'_, F>,
        flush_info: &[u8],
        actions: &[u8],
        resources: &[Vec<u8>],
    ) -> CodecResult<()> {
        writer.write_block(BlockKind::FlushInfo, flush_info)?;
        writer.write_block(BlockKind::Actions, actions)?;
        for resource in resources {
            writer.write_block(BlockKind::Resource, resource)?;
        }
        writer.emit(Trailer::Last)
    }

    /// Get statistics
    pub fn stats(&self) -> &PacketizerStats {
        &self.stats
    }
}
