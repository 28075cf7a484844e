use glam::IVec3;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use crate::world::block::Block;
use crate::world::chunk_coord::{CardinalDir, ChunkCoord};

pub const CHUNK_DEPTH: usize = 16; // x extent
pub const CHUNK_WIDTH: usize = 16; // z extent
pub const CHUNK_HEIGHT: usize = 256;
pub const SUB_CHUNK_HEIGHT: usize = 16;
pub const SUB_CHUNKS_PER_CHUNK: usize = CHUNK_HEIGHT / SUB_CHUNK_HEIGHT;
pub const CHUNK_VOLUME: usize = CHUNK_DEPTH * CHUNK_HEIGHT * CHUNK_WIDTH;

/// Flat index into a chunk's block array. The mesher, lighting engine and
/// serializer all depend on this exact mapping.
#[inline]
pub fn block_index(x: usize, y: usize, z: usize) -> usize {
    x * CHUNK_DEPTH + y * CHUNK_HEIGHT + z
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChunkState {
    Unloaded = 0,
    Unloading = 1,
    Saving = 2,
    Loading = 3,
    Loaded = 4,
}

impl ChunkState {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(ChunkState::Unloaded),
            1 => Some(ChunkState::Unloading),
            2 => Some(ChunkState::Saving),
            3 => Some(ChunkState::Loading),
            4 => Some(ChunkState::Loaded),
            _ => None,
        }
    }
}

/// One 16x256x16 column of blocks: the unit of streaming, persistence and
/// lighting. The block array sits behind its own lock; state and the
/// pipeline flags are atomics so the main thread and the chunk worker can
/// coordinate without taking it.
pub struct Chunk {
    coords: ChunkCoord,
    blocks: RwLock<Box<[Block]>>,
    state: AtomicU8,
    needs_decorations: AtomicBool,
    needs_lighting: AtomicBool,
    neighbors: [RwLock<Weak<Chunk>>; 4],
}

impl Chunk {
    pub fn new(coords: ChunkCoord, state: ChunkState) -> Self {
        Self {
            coords,
            blocks: RwLock::new(vec![Block::NULL; CHUNK_VOLUME].into_boxed_slice()),
            state: AtomicU8::new(state as u8),
            needs_decorations: AtomicBool::new(false),
            needs_lighting: AtomicBool::new(false),
            neighbors: Default::default(),
        }
    }

    pub fn coords(&self) -> ChunkCoord {
        self.coords
    }

    pub fn state(&self) -> ChunkState {
        ChunkState::from_u8(self.state.load(Ordering::Acquire)).expect("valid chunk state")
    }

    pub fn set_state(&self, state: ChunkState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Flips `Loaded -> Saving`; returns false if the chunk was in any
    /// other state (already saving, or mid-load).
    pub fn begin_saving(&self) -> bool {
        self.state
            .compare_exchange(
                ChunkState::Loaded as u8,
                ChunkState::Saving as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub fn needs_decorations(&self) -> bool {
        self.needs_decorations.load(Ordering::Acquire)
    }

    pub fn set_needs_decorations(&self, value: bool) {
        self.needs_decorations.store(value, Ordering::Release);
    }

    pub fn needs_lighting(&self) -> bool {
        self.needs_lighting.load(Ordering::Acquire)
    }

    pub fn set_needs_lighting(&self, value: bool) {
        self.needs_lighting.store(value, Ordering::Release);
    }

    pub fn neighbor(&self, dir: CardinalDir) -> Option<Arc<Chunk>> {
        self.neighbors[dir.index()].read().upgrade()
    }

    pub fn set_neighbor(&self, dir: CardinalDir, neighbor: Weak<Chunk>) {
        *self.neighbors[dir.index()].write() = neighbor;
    }

    pub fn blocks(&self) -> RwLockReadGuard<'_, Box<[Block]>> {
        self.blocks.read()
    }

    pub fn blocks_mut(&self) -> RwLockWriteGuard<'_, Box<[Block]>> {
        self.blocks.write()
    }

    /// Reads the block at chunk-local coordinates, hopping to neighbours
    /// when x or z leave `[0, 16)`. Y outside `[0, 256)` and missing
    /// neighbours both read as NULL.
    pub fn block_local(&self, x: i32, y: i32, z: i32) -> Block {
        if y < 0 || y >= CHUNK_HEIGHT as i32 {
            return Block::NULL;
        }
        if x < 0 {
            return match self.neighbor(CardinalDir::West) {
                Some(chunk) => chunk.block_local(x + CHUNK_DEPTH as i32, y, z),
                None => Block::NULL,
            };
        }
        if x >= CHUNK_DEPTH as i32 {
            return match self.neighbor(CardinalDir::East) {
                Some(chunk) => chunk.block_local(x - CHUNK_DEPTH as i32, y, z),
                None => Block::NULL,
            };
        }
        if z < 0 {
            return match self.neighbor(CardinalDir::North) {
                Some(chunk) => chunk.block_local(x, y, z + CHUNK_WIDTH as i32),
                None => Block::NULL,
            };
        }
        if z >= CHUNK_WIDTH as i32 {
            return match self.neighbor(CardinalDir::South) {
                Some(chunk) => chunk.block_local(x, y, z - CHUNK_WIDTH as i32),
                None => Block::NULL,
            };
        }
        self.blocks.read()[block_index(x as usize, y as usize, z as usize)]
    }

    /// Writes id and cached flags at chunk-local coordinates, preserving the
    /// current light values until the queued lighting pass rewrites them.
    /// Returns false when the position falls outside the loaded world.
    pub fn set_block_local(&self, x: i32, y: i32, z: i32, new: Block) -> bool {
        if y < 0 || y >= CHUNK_HEIGHT as i32 {
            return false;
        }
        if x < 0 {
            return match self.neighbor(CardinalDir::West) {
                Some(chunk) => chunk.set_block_local(x + CHUNK_DEPTH as i32, y, z, new),
                None => false,
            };
        }
        if x >= CHUNK_DEPTH as i32 {
            return match self.neighbor(CardinalDir::East) {
                Some(chunk) => chunk.set_block_local(x - CHUNK_DEPTH as i32, y, z, new),
                None => false,
            };
        }
        if z < 0 {
            return match self.neighbor(CardinalDir::North) {
                Some(chunk) => chunk.set_block_local(x, y, z + CHUNK_WIDTH as i32, new),
                None => false,
            };
        }
        if z >= CHUNK_WIDTH as i32 {
            return match self.neighbor(CardinalDir::South) {
                Some(chunk) => chunk.set_block_local(x, y, z - CHUNK_WIDTH as i32, new),
                None => false,
            };
        }
        let index = block_index(x as usize, y as usize, z as usize);
        let mut blocks = self.blocks.write();
        let old = blocks[index];
        blocks[index] = new
            .with_light_level(old.light_level())
            .with_sky_light_level(old.sky_light_level());
        true
    }

    /// Replaces the block with air. The old light values stay in place so
    /// the queued lighting removal can see what the block used to feed its
    /// neighbours; the relight rewrites them.
    pub fn remove_block_local(&self, x: i32, y: i32, z: i32) -> bool {
        self.set_block_local(x, y, z, Block::air())
    }

    /// Walks neighbour links until the coordinates land inside one chunk.
    /// `None` when y is out of range or a link is missing.
    pub fn resolve(self: &Arc<Self>, pos: IVec3) -> Option<(Arc<Chunk>, IVec3)> {
        if pos.y < 0 || pos.y >= CHUNK_HEIGHT as i32 {
            return None;
        }
        let mut chunk = self.clone();
        let mut x = pos.x;
        let mut z = pos.z;
        while x < 0 {
            chunk = chunk.neighbor(CardinalDir::West)?;
            x += CHUNK_DEPTH as i32;
        }
        while x >= CHUNK_DEPTH as i32 {
            chunk = chunk.neighbor(CardinalDir::East)?;
            x -= CHUNK_DEPTH as i32;
        }
        while z < 0 {
            chunk = chunk.neighbor(CardinalDir::North)?;
            z += CHUNK_WIDTH as i32;
        }
        while z >= CHUNK_WIDTH as i32 {
            chunk = chunk.neighbor(CardinalDir::South)?;
            z -= CHUNK_WIDTH as i32;
        }
        Some((chunk, IVec3::new(x, pos.y, z)))
    }

    /// Converts a world block position to coordinates local to this chunk
    /// (possibly outside `[0, 16)`, which the accessors resolve through
    /// neighbour links).
    pub fn to_local(&self, world: IVec3) -> IVec3 {
        world - self.coords.block_origin()
    }
}

impl std::fmt::Debug for Chunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunk")
            .field("coords", &self.coords)
            .field("state", &self.state())
            .finish()
    }
}
