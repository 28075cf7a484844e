use noise::{Fbm, MultiFractal, NoiseFn, Perlin};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha12Rng;
use std::sync::Arc;

use crate::world::block::Block;
use crate::world::block_registry::BlockRegistry;
use crate::world::blocks_data::WATER_ID;
use crate::world::chunk::{block_index, Chunk, CHUNK_DEPTH, CHUNK_HEIGHT, CHUNK_WIDTH};

pub const MIN_BIOME_HEIGHT: f64 = 55.0;
pub const MAX_BIOME_HEIGHT: f64 = 145.0;
pub const OCEAN_LEVEL: i32 = 85;

/// Weighted fractal-noise terrain. Each layer is seeded off the world seed
/// so the values stay uncorrelated, then blended by weight and raised to a
/// power to flatten valleys and sharpen peaks.
pub struct TerrainGenerator {
    layers: Vec<(Fbm<Perlin>, f64)>,
    seed: u32,
}

impl TerrainGenerator {
    pub fn new(seed: u32) -> Self {
        let layer = |offset: u32, frequency: f64, persistence: f64, octaves: usize, weight: f64| {
            (
                Fbm::<Perlin>::new(seed.wrapping_add(offset))
                    .set_octaves(octaves)
                    .set_frequency(frequency)
                    .set_persistence(persistence)
                    .set_lacunarity(2.0),
                weight,
            )
        };
        Self {
            layers: vec![
                layer(0, 0.002, 0.5, 6, 1.0),  // continents
                layer(1, 0.008, 0.5, 4, 0.6),  // hills
                layer(2, 0.035, 0.8, 3, 0.2),  // detail
            ],
            seed,
        }
    }

    pub fn seed(&self) -> u32 {
        self.seed
    }

    fn normalized_height(&self, x: i32, z: i32) -> f64 {
        let mut blended = 0.0;
        let mut weight_sum = 0.0;
        for (noise, weight) in &self.layers {
            let sample = noise.get([x as f64, z as f64]);
            blended += (sample * 0.5 + 0.5) * weight;
            weight_sum += weight;
        }
        (blended / weight_sum).clamp(0.0, 1.0).powf(1.19)
    }

    /// Terrain surface height for a world column, in `[55, 145]`.
    pub fn surface_height(&self, x: i32, z: i32) -> i32 {
        let t = self.normalized_height(x, z);
        (MIN_BIOME_HEIGHT + t * (MAX_BIOME_HEIGHT - MIN_BIOME_HEIGHT)).floor() as i32
    }

    /// Fills a freshly-allocated chunk with terrain: bedrock floor, stone
    /// body, dirt cap, grass or beach sand at the surface, ocean water up to
    /// sea level.
    pub fn generate(&self, chunk: &Chunk, registry: &BlockRegistry) {
        let origin = chunk.coords().block_origin();

        let bedrock = registry.make_block(registry.id_of("bedrock"));
        let stone = registry.make_block(registry.id_of("stone"));
        let dirt = registry.make_block(registry.id_of("dirt"));
        let grass = registry.make_block(registry.id_of("grass"));
        let sand = registry.make_block(registry.id_of("sand"));
        let water = registry.make_block(WATER_ID);
        let air = registry.make_block(Block::AIR_ID);

        let mut blocks = chunk.blocks_mut();
        for x in 0..CHUNK_DEPTH {
            for z in 0..CHUNK_WIDTH {
                let surface = self.surface_height(origin.x + x as i32, origin.z + z as i32);
                let stone_top = surface - 3;
                for y in 0..CHUNK_HEIGHT {
                    let world_y = y as i32;
                    let block = if world_y == 0 {
                        bedrock
                    } else if world_y < stone_top {
                        stone
                    } else if world_y < surface {
                        dirt
                    } else if world_y == surface {
                        if surface < OCEAN_LEVEL + 2 {
                            sand
                        } else {
                            grass
                        }
                    } else if world_y < OCEAN_LEVEL {
                        water
                    } else {
                        air
                    };
                    blocks[block_index(x, y, z)] = block;
                }
            }
        }
    }

    /// Plants trees on this chunk. Deterministic per chunk: the RNG is
    /// seeded from the world seed and the chunk coordinate, so decorating is
    /// independent of visit order. Crowns may spill into the four cardinal
    /// neighbours through the chunk's links.
    pub fn decorate(&self, chunk: &Arc<Chunk>, registry: &BlockRegistry) {
        let coords = chunk.coords();
        let origin = coords.block_origin();
        let mut rng = ChaCha12Rng::seed_from_u64(
            (self.seed as u64) ^ coords.pack().rotate_left(17),
        );

        let log = registry.make_block(registry.id_of("oak_log"));
        let leaves = registry.make_block(registry.id_of("oak_leaves"));

        for x in 0..CHUNK_DEPTH as i32 {
            for z in 0..CHUNK_WIDTH as i32 {
                if rng.gen_range(0..100) < 99 {
                    continue;
                }
                let surface = self.surface_height(origin.x + x, origin.z + z);
                let base = surface + 1;
                if surface < OCEAN_LEVEL + 2 {
                    continue; // no trees on beaches or under water
                }

                let trunk_height = rng.gen_range(3..=5);
                let crown_bottom = base + 3;
                let crown_top = base + trunk_height + 1;
                if crown_top + 1 >= CHUNK_HEIGHT as i32 {
                    continue;
                }

                for dy in 0..=trunk_height {
                    chunk.set_block_local(x, base + dy, z, log);
                }
                for leaves_y in crown_bottom..=crown_top {
                    let radius = if leaves_y == crown_top { 1 } else { 2 };
                    for lx in (x - radius)..=(x + radius) {
                        for lz in (z - radius)..=(z + radius) {
                            let existing = chunk.block_local(lx, leaves_y, lz);
                            if existing.is_air() {
                                chunk.set_block_local(lx, leaves_y, lz, leaves);
                            }
                        }
                    }
                }
            }
        }
    }
}
