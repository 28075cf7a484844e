use glam::Vec3;
use log::warn;
use std::sync::Arc;

use crate::render::pool::{SubChunkPool, SubChunkState};
use crate::world::chunk::{Chunk, ChunkState};
use crate::world::chunk_coord::ChunkCoord;
use crate::world::chunk_map::ChunkMap;
use crate::world::worker::ChunkWorker;

/// Watches the player's chunk coordinate and keeps the streamed disk of
/// chunks alive around it: saves what fell out of range, reclaims what
/// finished unloading, creates what came into range, and re-links the
/// neighbour graph before the worker touches any of it.
pub struct StreamingController {
    radius: i32,
    last_player_chunk: Option<ChunkCoord>,
}

impl StreamingController {
    pub fn new(radius: i32) -> Self {
        Self {
            radius,
            last_player_chunk: None,
        }
    }

    pub fn radius(&self) -> i32 {
        self.radius
    }

    /// One streaming tick. Call once per frame with the player's position.
    pub fn update(
        &mut self,
        map: &ChunkMap,
        pool: &SubChunkPool,
        worker: &ChunkWorker,
        player_pos: Vec3,
    ) {
        let player_chunk = ChunkCoord::from_world(player_pos);
        worker.set_player_chunk(player_chunk);
        let radius_sq = (self.radius as i64) * (self.radius as i64);
        let moved = self.last_player_chunk != Some(player_chunk);

        // Chunks that slid out of the radius get saved; their slots free
        // once the save runs.
        for slot in pool.slots() {
            if slot.state() == SubChunkState::Unloaded {
                continue;
            }
            let coords = slot.coords();
            if coords.distance_squared(player_chunk) > radius_sq {
                if let Some(chunk) = map.get(coords) {
                    if chunk.state() != ChunkState::Saving {
                        worker.queue_save(chunk);
                    }
                }
            }
        }

        // Reclaim everything the worker finished serializing.
        let unloaded = map.take_unloading();
        for chunk in &unloaded {
            chunk.set_state(ChunkState::Unloaded);
        }
        drop(unloaded);

        // Walk the inclusive radius disk: load missing chunks, refresh the
        // ring that just stopped being the border (its meshes were built
        // with NULL neighbours).
        let inner_ring_sq = ((self.radius - 2).max(0) as i64) * ((self.radius - 2).max(0) as i64);
        for z in (player_chunk.z - self.radius)..=(player_chunk.z + self.radius) {
            for x in (player_chunk.x - self.radius)..=(player_chunk.x + self.radius) {
                let coords = ChunkCoord::new(x, z);
                if coords.distance_squared(player_chunk) > radius_sq {
                    continue;
                }
                if let Some(chunk) = map.get(coords) {
                    let was_outer_ring = self
                        .last_player_chunk
                        .map(|last| coords.distance_squared(last) >= inner_ring_sq)
                        .unwrap_or(false);
                    if moved && was_outer_ring && chunk.state() == ChunkState::Loaded {
                        worker.queue_retesselate(chunk);
                    }
                } else {
                    let chunk = Arc::new(Chunk::new(coords, ChunkState::Loading));
                    match map.insert(chunk) {
                        Ok(chunk) => {
                            worker.queue_generate(chunk.clone());
                            worker.queue_retesselate(chunk);
                        }
                        Err(_) => {
                            warn!("chunk map full; cannot load chunk {}", coords);
                        }
                    }
                }
            }
        }

        worker.queue_decorate(player_chunk);
        worker.queue_calculate_lighting(player_chunk);

        // Links must be in place before decoration or lighting cross into
        // neighbours.
        map.patch_neighbors();

        self.last_player_chunk = Some(player_chunk);
    }
}
