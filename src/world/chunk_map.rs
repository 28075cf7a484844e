use glam::IVec3;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::world::block::Block;
use crate::world::chunk::{Chunk, ChunkState};
use crate::world::chunk_coord::{CardinalDir, ChunkCoord};

/// The owning map of loaded chunk columns. Structural mutation (insert and
/// the unload sweep) happens on the main thread only; the worker reads
/// through `Arc` handles it resolved before its command ran.
pub struct ChunkMap {
    chunks: RwLock<HashMap<ChunkCoord, Arc<Chunk>>>,
    capacity: usize,
}

impl ChunkMap {
    pub fn new(capacity: usize) -> Self {
        Self {
            chunks: RwLock::new(HashMap::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.chunks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.read().is_empty()
    }

    /// A chunk is addressable while Loading, Loaded or Saving; chunks on
    /// their way out read as absent.
    pub fn get(&self, coords: ChunkCoord) -> Option<Arc<Chunk>> {
        let chunk = self.chunks.read().get(&coords).cloned()?;
        match chunk.state() {
            ChunkState::Loading | ChunkState::Loaded | ChunkState::Saving => Some(chunk),
            ChunkState::Unloading | ChunkState::Unloaded => None,
        }
    }

    pub fn contains(&self, coords: ChunkCoord) -> bool {
        self.get(coords).is_some()
    }

    /// Inserts a fresh chunk. Fails (with the chunk handed back) when the
    /// configured capacity is exhausted.
    pub fn insert(&self, chunk: Arc<Chunk>) -> Result<Arc<Chunk>, Arc<Chunk>> {
        let mut chunks = self.chunks.write();
        if chunks.len() >= self.capacity {
            return Err(chunk);
        }
        chunks.insert(chunk.coords(), chunk.clone());
        Ok(chunk)
    }

    /// Removes every chunk that finished unloading and returns them for the
    /// caller to drop outside the map lock.
    pub fn take_unloading(&self) -> Vec<Arc<Chunk>> {
        let mut chunks = self.chunks.write();
        let gone: Vec<ChunkCoord> = chunks
            .iter()
            .filter(|(_, chunk)| chunk.state() == ChunkState::Unloading)
            .map(|(coords, _)| *coords)
            .collect();
        gone.iter().filter_map(|coords| chunks.remove(coords)).collect()
    }

    /// Snapshot of all live chunk handles.
    pub fn snapshot(&self) -> Vec<Arc<Chunk>> {
        self.chunks.read().values().cloned().collect()
    }

    /// Rewrites every chunk's four weak neighbour links from the current map
    /// contents. Must run after inserts and before the worker touches the
    /// new chunks, so cross-chunk writes can follow the links.
    pub fn patch_neighbors(&self) {
        let chunks = self.chunks.read();
        for chunk in chunks.values() {
            for dir in CardinalDir::ALL {
                let link = chunks
                    .get(&chunk.coords().neighbor(dir))
                    .map(Arc::downgrade)
                    .unwrap_or_default();
                chunk.set_neighbor(dir, link);
            }
        }
    }

    /// Reads the block at a world position; NULL when the chunk is not
    /// addressable or y is out of range.
    pub fn get_block(&self, world: IVec3) -> Block {
        match self.get(ChunkCoord::from_block(world)) {
            Some(chunk) => {
                let local = chunk.to_local(world);
                chunk.block_local(local.x, local.y, local.z)
            }
            None => Block::NULL,
        }
    }
}
