use glam::{IVec3, Vec3};
use log::{info, warn};
use std::sync::Arc;

use crate::config::WorldConfig;
use crate::render::pool::{SubChunkPool, VertexArena};
use crate::world::block::Block;
use crate::world::block_registry::BlockRegistry;
use crate::world::chunk::{Chunk, ChunkState, CHUNK_DEPTH, CHUNK_WIDTH};
use crate::world::chunk_coord::{CardinalDir, ChunkCoord};
use crate::world::chunk_map::ChunkMap;
use crate::world::generator::TerrainGenerator;
use crate::world::storage::{self, StorageError};
use crate::world::streaming::StreamingController;
use crate::world::worker::{ChunkWorker, WorkerContext};

/// The chunked world subsystem, packaged as one value: the block registry,
/// the chunk map, the sub-chunk vertex pool, the background worker and the
/// streaming controller. Dropping the world queues a save of every loaded
/// chunk and joins the worker, so shutdown is just `drop(world)`.
pub struct World {
    registry: Arc<BlockRegistry>,
    map: Arc<ChunkMap>,
    pool: Arc<SubChunkPool>,
    streaming: StreamingController,
    seed: u32,
    config: WorldConfig,
    // Declared last: the worker joins (finishing queued saves) after the
    // Drop impl has queued them.
    worker: ChunkWorker,
}

impl World {
    /// Builds a world over the given vertex arena (a persistently-mapped
    /// GPU buffer from the renderer, or host memory for servers). The seed
    /// comes from the config, else `world.bin`, else a fresh random one.
    pub fn new(
        config: WorldConfig,
        registry: Arc<BlockRegistry>,
        arena: VertexArena,
    ) -> Result<Self, StorageError> {
        let seed = match config.seed {
            Some(seed) => seed,
            None => match storage::load_world_seed(&config.save_root)? {
                Some(seed) => seed,
                None => rand::random(),
            },
        };
        storage::save_world_seed(&config.save_root, seed)?;
        info!("world seed: {seed}");

        let map = Arc::new(ChunkMap::new(config.chunk_capacity));
        let pool = Arc::new(SubChunkPool::new(
            config.sub_chunk_count(),
            config.max_verts_per_sub_chunk,
            arena,
        ));
        let worker = ChunkWorker::spawn(WorkerContext {
            map: map.clone(),
            pool: pool.clone(),
            registry: registry.clone(),
            generator: TerrainGenerator::new(seed),
            save_root: config.save_root.clone(),
            chunk_radius: config.chunk_radius,
        });
        let streaming = StreamingController::new(config.chunk_radius);

        Ok(Self {
            registry,
            map,
            pool,
            streaming,
            seed,
            config,
            worker,
        })
    }

    /// A world over host memory; servers and tests.
    pub fn new_headless(
        config: WorldConfig,
        registry: Arc<BlockRegistry>,
    ) -> Result<Self, StorageError> {
        let arena = VertexArena::host(
            config.sub_chunk_count() * config.max_verts_per_sub_chunk as usize,
        );
        Self::new(config, registry, arena)
    }

    pub fn seed(&self) -> u32 {
        self.seed
    }

    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<BlockRegistry> {
        &self.registry
    }

    pub fn map(&self) -> &Arc<ChunkMap> {
        &self.map
    }

    pub fn pool(&self) -> &Arc<SubChunkPool> {
        &self.pool
    }

    pub fn worker(&self) -> &ChunkWorker {
        &self.worker
    }

    /// One frame of streaming work around the player.
    pub fn update(&mut self, player_pos: Vec3) {
        self.streaming
            .update(&self.map, &self.pool, &self.worker, player_pos);
    }

    /// Reads a block anywhere in the world; NULL for unloaded chunks and
    /// out-of-range y.
    pub fn get_block(&self, world_pos: IVec3) -> Block {
        self.map.get_block(world_pos)
    }

    pub fn get_block_at(&self, world_pos: Vec3) -> Block {
        self.get_block(world_pos.floor().as_ivec3())
    }

    /// Places a block by registry id. The write lands immediately; the
    /// lighting update and retesselations run through the worker queue.
    pub fn set_block(&self, world_pos: IVec3, id: u16) -> bool {
        let Some(chunk) = self.map.get(ChunkCoord::from_block(world_pos)) else {
            warn!("tried to set block outside the loaded world at {world_pos}");
            return false;
        };
        if chunk.state() != ChunkState::Loaded {
            return false;
        }
        let local = chunk.to_local(world_pos);
        if !chunk.set_block_local(local.x, local.y, local.z, self.registry.make_block(id)) {
            return false;
        }
        self.retesselate_after_block_update(&chunk, local);
        self.worker
            .queue_recalc_lighting(chunk, world_pos, false);
        true
    }

    /// Breaks a block. The old light values stay until the queued relight
    /// so the darkening pass can see what the block used to emit.
    pub fn remove_block(&self, world_pos: IVec3) -> bool {
        let Some(chunk) = self.map.get(ChunkCoord::from_block(world_pos)) else {
            warn!("tried to remove block outside the loaded world at {world_pos}");
            return false;
        };
        if chunk.state() != ChunkState::Loaded {
            return false;
        }
        let removed_light_source = self.get_block(world_pos).is_light_source();
        let local = chunk.to_local(world_pos);
        if !chunk.remove_block_local(local.x, local.y, local.z) {
            return false;
        }
        self.retesselate_after_block_update(&chunk, local);
        self.worker
            .queue_recalc_lighting(chunk, world_pos, removed_light_source);
        true
    }

    /// Queues a mesh rebuild for the mutated chunk, plus any neighbour
    /// sharing the touched border (its culled faces may have changed).
    fn retesselate_after_block_update(&self, chunk: &Arc<Chunk>, local: IVec3) {
        self.worker.queue_retesselate(chunk.clone());
        let mut dirs = Vec::with_capacity(2);
        if local.x == 0 {
            dirs.push(CardinalDir::West);
        } else if local.x == CHUNK_DEPTH as i32 - 1 {
            dirs.push(CardinalDir::East);
        }
        if local.z == 0 {
            dirs.push(CardinalDir::North);
        } else if local.z == CHUNK_WIDTH as i32 - 1 {
            dirs.push(CardinalDir::South);
        }
        for dir in dirs {
            if let Some(neighbor) = chunk.neighbor(dir) {
                self.worker.queue_retesselate(neighbor);
            }
        }
    }

    /// Queues a save for every loaded chunk; the worker drains these even
    /// during shutdown.
    pub fn save_all(&self) {
        for chunk in self.map.snapshot() {
            if chunk.state() == ChunkState::Loaded {
                self.worker.queue_save(chunk);
            }
        }
    }
}

impl Drop for World {
    fn drop(&mut self) {
        self.save_all();
        // The worker field's Drop joins the thread after draining saves.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::{Duration, Instant};

    fn test_config(dir: &std::path::Path) -> WorldConfig {
        WorldConfig {
            chunk_radius: 2,
            chunk_capacity: 32,
            max_verts_per_sub_chunk: 4500,
            save_root: dir.to_path_buf(),
            seed: Some(42),
        }
    }

    fn settle(world: &mut World, pos: Vec3) {
        let deadline = Instant::now() + Duration::from_secs(30);
        loop {
            world.update(pos);
            let done = !world.map().is_empty()
                && world
                    .map()
                    .snapshot()
                    .iter()
                    .all(|chunk| chunk.state() == ChunkState::Loaded && !chunk.needs_lighting());
            if done || Instant::now() > deadline {
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        // Let the worker drain decoration and mesh commands queued by the
        // final update, so the block data is quiescent.
        while world.worker().pending() > 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn persistence_round_trip_preserves_the_world() {
        let dir = tempfile::tempdir().unwrap();
        let spawn = Vec3::new(8.0, 200.0, 8.0);
        let target = IVec3::new(3, 70, 9);

        let snapshot: HashMap<ChunkCoord, Vec<u16>>;
        {
            let mut world = World::new_headless(
                test_config(dir.path()),
                BlockRegistry::shared_default(),
            )
            .unwrap();
            settle(&mut world, spawn);

            snapshot = world
                .map()
                .snapshot()
                .into_iter()
                .map(|chunk| {
                    let ids = chunk.blocks().iter().map(|b| b.id()).collect();
                    (chunk.coords(), ids)
                })
                .collect();

            assert!(world.set_block(target, 7));
            // Dropping saves everything.
        }

        let mut world =
            World::new_headless(test_config(dir.path()), BlockRegistry::shared_default()).unwrap();
        assert_eq!(world.seed(), 42);
        settle(&mut world, spawn);

        assert_eq!(world.get_block(target).id(), 7);
        for chunk in world.map().snapshot() {
            let before = &snapshot[&chunk.coords()];
            let blocks = chunk.blocks();
            for (index, block) in blocks.iter().enumerate() {
                let expected = if chunk.coords() == ChunkCoord::from_block(target)
                    && index
                        == crate::world::chunk::block_index(
                            target.x as usize,
                            target.y as usize,
                            target.z as usize,
                        ) {
                    7
                } else {
                    before[index]
                };
                assert_eq!(block.id(), expected, "block {index} in {}", chunk.coords());
            }
        }
    }

    #[test]
    fn set_block_is_idempotent_on_visible_state() {
        let dir = tempfile::tempdir().unwrap();
        let mut world =
            World::new_headless(test_config(dir.path()), BlockRegistry::shared_default()).unwrap();
        settle(&mut world, Vec3::new(8.0, 200.0, 8.0));

        let pos = IVec3::new(5, 120, 5);
        assert!(world.set_block(pos, 6));
        let first = world.get_block(pos);
        assert!(world.set_block(pos, 6));
        let second = world.get_block(pos);
        assert_eq!(first.id(), second.id());
        assert_eq!(first.id(), 6);
    }

    #[test]
    fn mutations_outside_loaded_chunks_fail_soft() {
        let dir = tempfile::tempdir().unwrap();
        let world =
            World::new_headless(test_config(dir.path()), BlockRegistry::shared_default()).unwrap();
        assert!(!world.set_block(IVec3::new(10_000, 70, 10_000), 6));
        assert!(!world.remove_block(IVec3::new(10_000, 70, 10_000)));
        assert_eq!(world.get_block(IVec3::new(10_000, 70, 10_000)), Block::NULL);
    }

    #[test]
    fn world_reuses_persisted_seed() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.seed = None;
        let seed;
        {
            let world =
                World::new_headless(config.clone(), BlockRegistry::shared_default()).unwrap();
            seed = world.seed();
        }
        let world = World::new_headless(config, BlockRegistry::shared_default()).unwrap();
        assert_eq!(world.seed(), seed);
    }
}
