use crossbeam_channel::{Receiver, Sender, TryRecvError};
use glam::IVec3;
use log::{debug, warn};
use std::collections::BinaryHeap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::render::pool::SubChunkPool;
use crate::world::block::Block;
use crate::world::block_registry::BlockRegistry;
use crate::world::chunk::{Chunk, ChunkState};
use crate::world::chunk_coord::ChunkCoord;
use crate::world::chunk_map::ChunkMap;
use crate::world::generator::TerrainGenerator;
use crate::world::{lighting, mesher, storage};

/// Work items the chunk thread understands. Lower ordinal, higher
/// priority: saves always beat everything so shutdown persists quickly, and
/// meshing runs last so it sees settled blocks and light.
#[derive(Debug)]
pub enum Command {
    SaveBlockData {
        chunk: Arc<Chunk>,
    },
    ClientLoadChunk {
        chunk: Arc<Chunk>,
        payload: Box<[Block]>,
    },
    GenerateTerrain {
        chunk: Arc<Chunk>,
    },
    GenerateDecorations {
        player: ChunkCoord,
    },
    CalculateLighting {
        player: ChunkCoord,
    },
    RecalculateLighting {
        chunk: Arc<Chunk>,
        block_pos: IVec3,
        removed_light_source: bool,
    },
    TesselateVertices {
        chunk: Arc<Chunk>,
    },
}

impl Command {
    fn ordinal(&self) -> u8 {
        match self {
            Command::SaveBlockData { .. } => 0,
            Command::ClientLoadChunk { .. } => 1,
            Command::GenerateTerrain { .. } => 2,
            Command::GenerateDecorations { .. } => 3,
            Command::CalculateLighting { .. } => 4,
            Command::RecalculateLighting { .. } => 5,
            Command::TesselateVertices { .. } => 6,
        }
    }

    fn chunk(&self) -> Option<&Arc<Chunk>> {
        match self {
            Command::SaveBlockData { chunk }
            | Command::ClientLoadChunk { chunk, .. }
            | Command::GenerateTerrain { chunk }
            | Command::RecalculateLighting { chunk, .. }
            | Command::TesselateVertices { chunk } => Some(chunk),
            Command::GenerateDecorations { .. } | Command::CalculateLighting { .. } => None,
        }
    }
}

/// Heap entry: command kind first, then distance to the player at enqueue
/// time, closer chunks first.
struct Prioritized {
    command: Command,
    distance: i64,
}

impl Prioritized {
    fn new(command: Command, player: ChunkCoord) -> Self {
        let distance = command
            .chunk()
            .map(|chunk| chunk.coords().distance_squared(player))
            .unwrap_or(0);
        Self { command, distance }
    }
}

impl PartialEq for Prioritized {
    fn eq(&self, other: &Self) -> bool {
        self.command.ordinal() == other.command.ordinal() && self.distance == other.distance
    }
}

impl Eq for Prioritized {}

impl PartialOrd for Prioritized {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Prioritized {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Max-heap: greater pops first. Lower ordinal wins, then the
        // smaller distance.
        other
            .command
            .ordinal()
            .cmp(&self.command.ordinal())
            .then_with(|| other.distance.cmp(&self.distance))
    }
}

enum WorkerMsg {
    Command(Command),
    Shutdown,
}

/// Everything the worker thread owns while it runs.
pub struct WorkerContext {
    pub map: Arc<ChunkMap>,
    pub pool: Arc<SubChunkPool>,
    pub registry: Arc<BlockRegistry>,
    pub generator: TerrainGenerator,
    pub save_root: PathBuf,
    pub chunk_radius: i32,
}

/// The single background thread that owns all mutating access to chunk
/// block data. Commands arrive over a channel, drain into a priority heap,
/// and pop in the order defined above; the thread parks on the channel when
/// idle. During shutdown only save commands still execute.
pub struct ChunkWorker {
    tx: Sender<WorkerMsg>,
    handle: Option<JoinHandle<()>>,
    player_chunk: Arc<AtomicU64>,
    pending: Arc<AtomicUsize>,
    pool: Arc<SubChunkPool>,
}

impl ChunkWorker {
    pub fn spawn(ctx: WorkerContext) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        let player_chunk = Arc::new(AtomicU64::new(ChunkCoord::new(0, 0).pack()));
        let pending = Arc::new(AtomicUsize::new(0));
        let pool = ctx.pool.clone();
        let thread_player = player_chunk.clone();
        let thread_pending = pending.clone();
        let handle = std::thread::Builder::new()
            .name("chunk-worker".into())
            .spawn(move || run(ctx, rx, thread_player, thread_pending))
            .expect("spawn chunk worker");
        Self {
            tx,
            handle: Some(handle),
            player_chunk,
            pending,
            pool,
        }
    }

    pub fn set_player_chunk(&self, coords: ChunkCoord) {
        self.player_chunk.store(coords.pack(), Ordering::Release);
    }

    pub fn player_chunk(&self) -> ChunkCoord {
        ChunkCoord::unpack(self.player_chunk.load(Ordering::Acquire))
    }

    /// Commands enqueued but not yet finished, including any the worker
    /// spawned internally. Zero means the worker is idle.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    fn send(&self, command: Command) {
        self.pending.fetch_add(1, Ordering::AcqRel);
        if self.tx.send(WorkerMsg::Command(command)).is_err() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            warn!("chunk worker is gone; dropping command");
        }
    }

    pub fn queue_generate(&self, chunk: Arc<Chunk>) {
        self.send(Command::GenerateTerrain { chunk });
    }

    pub fn queue_client_load(&self, chunk: Arc<Chunk>, payload: Box<[Block]>) {
        self.send(Command::ClientLoadChunk { chunk, payload });
    }

    pub fn queue_recalc_lighting(
        &self,
        chunk: Arc<Chunk>,
        block_pos: IVec3,
        removed_light_source: bool,
    ) {
        self.send(Command::RecalculateLighting {
            chunk,
            block_pos,
            removed_light_source,
        });
    }

    /// Flags the chunk's live buckets for rebuild and queues the mesh pass.
    pub fn queue_retesselate(&self, chunk: Arc<Chunk>) {
        self.pool.mark_chunk_for_retesselation(chunk.coords());
        self.send(Command::TesselateVertices { chunk });
    }

    /// Moves the chunk to `Saving` and queues serialization. A chunk
    /// already saving (or still loading) is left alone.
    pub fn queue_save(&self, chunk: Arc<Chunk>) {
        if chunk.begin_saving() {
            self.send(Command::SaveBlockData { chunk });
        }
    }

    pub fn queue_decorate(&self, player: ChunkCoord) {
        self.send(Command::GenerateDecorations { player });
    }

    pub fn queue_calculate_lighting(&self, player: ChunkCoord) {
        self.send(Command::CalculateLighting { player });
    }

    /// Signals shutdown and blocks until the worker drained its saves.
    pub fn shutdown(&mut self) {
        let _ = self.tx.send(WorkerMsg::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ChunkWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(
    ctx: WorkerContext,
    rx: Receiver<WorkerMsg>,
    player_chunk: Arc<AtomicU64>,
    pending: Arc<AtomicUsize>,
) {
    let mut queue: BinaryHeap<Prioritized> = BinaryHeap::new();
    let mut shutting_down = false;

    loop {
        let player = ChunkCoord::unpack(player_chunk.load(Ordering::Acquire));

        // Drain everything that arrived while we were busy.
        loop {
            match rx.try_recv() {
                Ok(WorkerMsg::Command(command)) => {
                    queue.push(Prioritized::new(command, player))
                }
                Ok(WorkerMsg::Shutdown) | Err(TryRecvError::Disconnected) => {
                    shutting_down = true;
                    break;
                }
                Err(TryRecvError::Empty) => break,
            }
        }

        let Some(Prioritized { command, .. }) = queue.pop() else {
            if shutting_down {
                break;
            }
            // Idle: park until someone has work for us.
            match rx.recv() {
                Ok(WorkerMsg::Command(command)) => {
                    queue.push(Prioritized::new(command, player))
                }
                Ok(WorkerMsg::Shutdown) | Err(_) => shutting_down = true,
            }
            continue;
        };

        if shutting_down && !matches!(command, Command::SaveBlockData { .. }) {
            // Only persistence runs during shutdown.
            pending.fetch_sub(1, Ordering::AcqRel);
            continue;
        }

        process(&ctx, &mut queue, &pending, command, player);
        pending.fetch_sub(1, Ordering::AcqRel);
    }
}

fn process(
    ctx: &WorkerContext,
    queue: &mut BinaryHeap<Prioritized>,
    pending: &AtomicUsize,
    command: Command,
    player: ChunkCoord,
) {
    match command {
        Command::GenerateTerrain { chunk } => {
            if chunk.state() != ChunkState::Loading {
                return;
            }
            match storage::load_chunk_blocks(&ctx.save_root, chunk.coords(), &ctx.registry) {
                Ok(Some(blocks)) => {
                    chunk.blocks_mut().copy_from_slice(&blocks);
                    chunk.set_needs_decorations(false);
                }
                Ok(None) => {
                    ctx.generator.generate(&chunk, &ctx.registry);
                    chunk.set_needs_decorations(true);
                }
                Err(err) => {
                    warn!(
                        "discarding chunk file for {}: {err}; regenerating",
                        chunk.coords()
                    );
                    ctx.generator.generate(&chunk, &ctx.registry);
                    chunk.set_needs_decorations(true);
                }
            }
            chunk.set_needs_lighting(true);
            chunk.set_state(ChunkState::Loaded);
        }
        Command::ClientLoadChunk { chunk, payload } => {
            if chunk.state() != ChunkState::Loading {
                return;
            }
            {
                let mut blocks = chunk.blocks_mut();
                blocks.copy_from_slice(&payload);
                // The wire carries ids; rebuild the cached flag bits from
                // our registry so they can never disagree.
                for block in blocks.iter_mut() {
                    *block = ctx.registry.make_block(block.id());
                }
            }
            chunk.set_needs_decorations(false);
            chunk.set_needs_lighting(true);
            chunk.set_state(ChunkState::Loaded);
        }
        Command::GenerateDecorations { player } => {
            for_chunks_in_radius(ctx, player, ctx.chunk_radius - 1, |chunk| {
                if chunk.needs_decorations() {
                    chunk.set_needs_decorations(false);
                    ctx.generator.decorate(&chunk, &ctx.registry);
                }
            });
        }
        Command::CalculateLighting { player } => {
            // Sky columns first for the whole neighbourhood, then the
            // flood pass; flooding reads neighbours' seeded columns.
            for_chunks_in_radius(ctx, player, ctx.chunk_radius, |chunk| {
                if chunk.needs_lighting() {
                    lighting::seed_sky_columns(&chunk);
                }
            });
            for_chunks_in_radius(ctx, player, ctx.chunk_radius, |chunk| {
                if chunk.needs_lighting() {
                    lighting::light_chunk(&chunk, &ctx.registry);
                    chunk.set_needs_lighting(false);
                }
            });
        }
        Command::RecalculateLighting {
            chunk,
            block_pos,
            removed_light_source,
        } => {
            if chunk.state() != ChunkState::Loaded {
                return;
            }
            let touched =
                lighting::recalculate(&chunk, block_pos, removed_light_source, &ctx.registry);
            // The relight and its retesselations ride the same queue, so
            // the renderer never sees new light without the matching mesh.
            for coords in touched {
                let Some(stale) = ctx.map.get(coords) else {
                    continue;
                };
                ctx.pool.mark_chunk_for_retesselation(coords);
                pending.fetch_add(1, Ordering::AcqRel);
                queue.push(Prioritized::new(
                    Command::TesselateVertices { chunk: stale },
                    player,
                ));
            }
        }
        Command::TesselateVertices { chunk } => {
            if chunk.state() != ChunkState::Loaded {
                // The chunk unloaded since this was queued.
                return;
            }
            mesher::tesselate(&chunk, &ctx.registry, &ctx.pool);
        }
        Command::SaveBlockData { chunk } => {
            if chunk.state() != ChunkState::Saving {
                return;
            }
            ctx.pool.free_chunk_slots(chunk.coords());
            match storage::save_chunk(&ctx.save_root, &chunk) {
                Ok(()) => {
                    debug!("saved chunk {}", chunk.coords());
                    chunk.set_state(ChunkState::Unloading);
                }
                Err(err) => {
                    // No automatic retry; the chunk stays resident.
                    warn!("failed to save chunk {}: {err}", chunk.coords());
                    chunk.set_state(ChunkState::Loaded);
                }
            }
        }
    }
}

fn for_chunks_in_radius(
    ctx: &WorkerContext,
    center: ChunkCoord,
    radius: i32,
    mut f: impl FnMut(Arc<Chunk>),
) {
    for z in (center.z - radius)..=(center.z + radius) {
        for x in (center.x - radius)..=(center.x + radius) {
            let coords = ChunkCoord::new(x, z);
            if coords.distance_squared(center) > (radius as i64) * (radius as i64) {
                continue;
            }
            if let Some(chunk) = ctx.map.get(coords) {
                f(chunk);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::pool::SubChunkState;
    use std::time::{Duration, Instant};

    fn init_logger() {
        let _ = simple_logger::SimpleLogger::new()
            .with_level(log::LevelFilter::Warn)
            .init();
    }

    fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        cond()
    }

    fn test_context(save_root: PathBuf) -> (WorkerContext, Arc<ChunkMap>, Arc<SubChunkPool>) {
        let map = Arc::new(ChunkMap::new(64));
        let pool = Arc::new(SubChunkPool::host(64, 4500));
        let ctx = WorkerContext {
            map: map.clone(),
            pool: pool.clone(),
            registry: BlockRegistry::shared_default(),
            generator: TerrainGenerator::new(42),
            save_root,
            chunk_radius: 4,
        };
        (ctx, map, pool)
    }

    #[test]
    fn commands_pop_in_priority_order() {
        let player = ChunkCoord::new(0, 0);
        let near = Arc::new(Chunk::new(ChunkCoord::new(1, 0), ChunkState::Loading));
        let far = Arc::new(Chunk::new(ChunkCoord::new(5, 5), ChunkState::Loading));
        let saving = Arc::new(Chunk::new(ChunkCoord::new(9, 9), ChunkState::Saving));

        let mut queue = BinaryHeap::new();
        queue.push(Prioritized::new(
            Command::TesselateVertices { chunk: far.clone() },
            player,
        ));
        queue.push(Prioritized::new(
            Command::GenerateTerrain { chunk: far.clone() },
            player,
        ));
        queue.push(Prioritized::new(
            Command::GenerateTerrain { chunk: near.clone() },
            player,
        ));
        queue.push(Prioritized::new(
            Command::SaveBlockData { chunk: saving },
            player,
        ));
        queue.push(Prioritized::new(
            Command::TesselateVertices { chunk: near },
            player,
        ));

        let order: Vec<(u8, i64)> = std::iter::from_fn(|| queue.pop())
            .map(|p| (p.command.ordinal(), p.distance))
            .collect();
        assert_eq!(
            order,
            vec![
                (0, 162), // save first, regardless of distance
                (2, 1),   // near terrain
                (2, 50),  // far terrain
                (6, 1),   // near mesh
                (6, 50),  // far mesh
            ]
        );
    }

    #[test]
    fn generate_light_tesselate_pipeline() {
        init_logger();
        let dir = tempfile::tempdir().unwrap();
        let (ctx, map, pool) = test_context(dir.path().to_path_buf());
        let mut worker = ChunkWorker::spawn(ctx);

        let coords = ChunkCoord::new(0, 0);
        let chunk = map
            .insert(Arc::new(Chunk::new(coords, ChunkState::Loading)))
            .unwrap();
        map.patch_neighbors();

        worker.queue_generate(chunk.clone());
        worker.queue_calculate_lighting(coords);
        worker.queue_retesselate(chunk.clone());

        assert!(wait_until(Duration::from_secs(10), || {
            pool.slots()
                .iter()
                .any(|slot| slot.state() == SubChunkState::UploadVerticesToGpu)
        }));
        assert_eq!(chunk.state(), ChunkState::Loaded);
        assert!(!chunk.needs_lighting());

        // Terrain landed and the sky got seeded.
        let surface = chunk.block_local(8, 255, 8);
        assert!(surface.is_air());
        assert_eq!(surface.sky_light_level(), 31);

        worker.shutdown();
    }

    #[test]
    fn save_persists_and_frees_slots() {
        init_logger();
        let dir = tempfile::tempdir().unwrap();
        let (ctx, map, pool) = test_context(dir.path().to_path_buf());
        let mut worker = ChunkWorker::spawn(ctx);

        let coords = ChunkCoord::new(2, -1);
        let chunk = map
            .insert(Arc::new(Chunk::new(coords, ChunkState::Loading)))
            .unwrap();
        map.patch_neighbors();
        worker.queue_generate(chunk.clone());
        worker.queue_retesselate(chunk.clone());
        assert!(wait_until(Duration::from_secs(10), || {
            chunk.state() == ChunkState::Loaded
                && pool
                    .slots()
                    .iter()
                    .any(|slot| slot.state() == SubChunkState::UploadVerticesToGpu)
        }));

        // Pretend the renderer uploaded them.
        for slot in pool.slots() {
            slot.transition(SubChunkState::UploadVerticesToGpu, SubChunkState::Uploaded);
        }

        worker.queue_save(chunk.clone());
        assert!(wait_until(Duration::from_secs(10), || {
            chunk.state() == ChunkState::Unloading
        }));
        assert!(storage::chunk_file_exists(dir.path(), coords));
        assert!(pool
            .slots()
            .iter()
            .all(|slot| slot.state() == SubChunkState::Unloaded));

        worker.shutdown();
    }

    #[test]
    fn shutdown_still_saves_queued_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, map, _pool) = test_context(dir.path().to_path_buf());
        let mut worker = ChunkWorker::spawn(ctx);

        let coords = ChunkCoord::new(0, 3);
        let chunk = map
            .insert(Arc::new(Chunk::new(coords, ChunkState::Loading)))
            .unwrap();
        worker.queue_generate(chunk.clone());
        assert!(wait_until(Duration::from_secs(10), || {
            chunk.state() == ChunkState::Loaded
        }));

        worker.queue_save(chunk.clone());
        worker.shutdown();

        assert!(storage::chunk_file_exists(dir.path(), coords));
        assert_eq!(chunk.state(), ChunkState::Unloading);
    }

    #[test]
    fn stale_commands_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, map, pool) = test_context(dir.path().to_path_buf());
        let mut worker = ChunkWorker::spawn(ctx);

        // A chunk that unloaded before its mesh command ran.
        let chunk = map
            .insert(Arc::new(Chunk::new(ChunkCoord::new(0, 0), ChunkState::Loading)))
            .unwrap();
        chunk.set_state(ChunkState::Unloading);
        worker.queue_retesselate(chunk.clone());

        // Give the worker a beat, then confirm nothing was tesselated.
        std::thread::sleep(Duration::from_millis(100));
        assert!(pool
            .slots()
            .iter()
            .all(|slot| slot.state() == SubChunkState::Unloaded));
        worker.shutdown();
    }

    #[test]
    fn client_load_rehydrates_flags() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, map, _pool) = test_context(dir.path().to_path_buf());
        let registry = ctx.registry.clone();
        let mut worker = ChunkWorker::spawn(ctx);

        let coords = ChunkCoord::new(1, 1);
        let chunk = map
            .insert(Arc::new(Chunk::new(coords, ChunkState::Loading)))
            .unwrap();

        // Payload with raw ids only, as if decoded off the wire.
        let water_id = registry.id_of("water");
        let payload: Box<[Block]> = vec![
            Block::new(water_id, false, false, false);
            crate::world::chunk::CHUNK_VOLUME
        ]
        .into_boxed_slice();
        worker.queue_client_load(chunk.clone(), payload);

        assert!(wait_until(Duration::from_secs(10), || {
            chunk.state() == ChunkState::Loaded
        }));
        let block = chunk.block_local(0, 0, 0);
        assert_eq!(block.id(), water_id);
        assert!(block.is_transparent(), "flags must come from the registry");
        assert!(block.is_blendable());
        assert!(chunk.needs_lighting());
        worker.shutdown();
    }
}
