//! Wire frames for the LAN chunk protocol: the initial world send (chunk
//! snapshots) and the two block-mutation messages. Everything is
//! little-endian and reuses the on-disk RLE codec for block payloads.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use glam::Vec3;
use std::io::{Read, Write};
use thiserror::Error;

use crate::world::block::Block;
use crate::world::block_registry::BlockRegistry;
use crate::world::chunk::{Chunk, ChunkState};
use crate::world::chunk_coord::ChunkCoord;
use crate::world::storage::{self, StorageError};

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("malformed frame: {0}")]
    Malformed(&'static str),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// One chunk as it travels in the initial world send.
pub struct ChunkSnapshot {
    pub coords: ChunkCoord,
    pub state: ChunkState,
    pub blocks: Box<[Block]>,
}

impl ChunkSnapshot {
    /// Copies a live chunk's blocks for sending.
    pub fn of_chunk(chunk: &Chunk) -> Self {
        Self {
            coords: chunk.coords(),
            state: chunk.state(),
            blocks: chunk.blocks().clone(),
        }
    }
}

/// ```text
/// u16  num_chunks
/// repeat num_chunks times:
///     u32  compressed_size
///     RLE payload (compressed_size bytes)
///     i32  chunk_x
///     i32  chunk_z
///     u8   chunk_state
/// ```
pub fn write_chunk_stream<W: Write>(
    w: &mut W,
    snapshots: &[ChunkSnapshot],
) -> Result<(), ProtocolError> {
    let count = u16::try_from(snapshots.len())
        .map_err(|_| ProtocolError::Malformed("too many chunks for one stream"))?;
    w.write_u16::<LittleEndian>(count)?;
    for snapshot in snapshots {
        storage::write_blocks(w, &snapshot.blocks, snapshot.coords)?;
        w.write_u8(snapshot.state as u8)?;
    }
    Ok(())
}

pub fn read_chunk_stream<R: Read>(
    r: &mut R,
    registry: &BlockRegistry,
) -> Result<Vec<ChunkSnapshot>, ProtocolError> {
    let count = r.read_u16::<LittleEndian>()?;
    let mut snapshots = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let (blocks, coords) = storage::read_blocks(r, registry)?;
        let state = ChunkState::from_u8(r.read_u8()?)
            .ok_or(ProtocolError::Malformed("unknown chunk state"))?;
        snapshots.push(ChunkSnapshot {
            coords,
            state,
            blocks,
        });
    }
    Ok(snapshots)
}

/// `SetBlock`: world position as three f32, then the packed block word.
pub fn write_set_block<W: Write>(
    w: &mut W,
    world_pos: Vec3,
    block: Block,
) -> Result<(), ProtocolError> {
    w.write_f32::<LittleEndian>(world_pos.x)?;
    w.write_f32::<LittleEndian>(world_pos.y)?;
    w.write_f32::<LittleEndian>(world_pos.z)?;
    w.write_u32::<LittleEndian>(block.bits())?;
    Ok(())
}

pub fn read_set_block<R: Read>(r: &mut R) -> Result<(Vec3, Block), ProtocolError> {
    let x = r.read_f32::<LittleEndian>()?;
    let y = r.read_f32::<LittleEndian>()?;
    let z = r.read_f32::<LittleEndian>()?;
    let block = Block::from_bits(r.read_u32::<LittleEndian>()?);
    Ok((Vec3::new(x, y, z), block))
}

/// `RemoveBlock`: just the world position.
pub fn write_remove_block<W: Write>(w: &mut W, world_pos: Vec3) -> Result<(), ProtocolError> {
    w.write_f32::<LittleEndian>(world_pos.x)?;
    w.write_f32::<LittleEndian>(world_pos.y)?;
    w.write_f32::<LittleEndian>(world_pos.z)?;
    Ok(())
}

pub fn read_remove_block<R: Read>(r: &mut R) -> Result<Vec3, ProtocolError> {
    let x = r.read_f32::<LittleEndian>()?;
    let y = r.read_f32::<LittleEndian>()?;
    let z = r.read_f32::<LittleEndian>()?;
    Ok(Vec3::new(x, y, z))
}
