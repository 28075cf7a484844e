use glam::IVec3;
use std::sync::Arc;

use crate::render::pool::{SubChunkPool, SubChunkState};
use crate::render::vertex::{Face, UvIndex, Vertex};
use crate::world::block::Block;
use crate::world::block_registry::{BlockRegistry, TintedFaces};
use crate::world::blocks_data::WATER_ID;
use crate::world::chunk::{Chunk, CHUNK_DEPTH, CHUNK_WIDTH, SUB_CHUNKS_PER_CHUNK, SUB_CHUNK_HEIGHT};
use crate::world::chunk_coord::ChunkCoord;

/// Block light colour is fixed at white until coloured lighting lands.
const WHITE: (u8, u8, u8) = (7, 7, 7);

/// Neighbour cell checked for each face, in `Face` order.
const FACE_NEIGHBOR: [IVec3; 6] = [
    IVec3::new(0, 0, -1), // left
    IVec3::new(0, 0, 1),  // right
    IVec3::new(0, -1, 0), // bottom
    IVec3::new(0, 1, 0),  // top
    IVec3::new(-1, 0, 0), // back
    IVec3::new(1, 0, 0),  // front
];

/// Corner indices (into the cube's 8 corners) forming each face's quad.
const FACE_CORNERS: [[usize; 4]; 6] = [
    [0, 4, 7, 3], // left
    [2, 6, 5, 1], // right
    [0, 3, 2, 1], // bottom
    [5, 6, 7, 4], // top
    [0, 1, 5, 4], // back
    [7, 6, 2, 3], // front
];

/// Smooth lighting: the four cells sharing a face corner on its air side.
/// Offsets are added to the corner's grid position.
const CORNER_SAMPLES: [[IVec3; 4]; 6] = [
    [
        IVec3::new(0, 0, -1),
        IVec3::new(-1, 0, -1),
        IVec3::new(-1, -1, -1),
        IVec3::new(0, -1, -1),
    ],
    [
        IVec3::new(0, 0, 0),
        IVec3::new(-1, 0, 0),
        IVec3::new(-1, -1, 0),
        IVec3::new(0, -1, 0),
    ],
    [
        IVec3::new(0, -1, 0),
        IVec3::new(-1, -1, 0),
        IVec3::new(-1, -1, -1),
        IVec3::new(0, -1, -1),
    ],
    [
        IVec3::new(0, 0, 0),
        IVec3::new(-1, 0, 0),
        IVec3::new(-1, 0, -1),
        IVec3::new(0, 0, -1),
    ],
    [
        IVec3::new(-1, 0, 0),
        IVec3::new(-1, -1, 0),
        IVec3::new(-1, -1, -1),
        IVec3::new(-1, 0, -1),
    ],
    [
        IVec3::new(0, 0, 0),
        IVec3::new(0, -1, 0),
        IVec3::new(0, -1, -1),
        IVec3::new(0, 0, -1),
    ],
];

/// UV rotation per face, so texture orientation matches the right-handed
/// world: back +2, left and right +3, everything else unrotated.
fn uv_rotation(face: Face) -> u32 {
    match face {
        Face::Back => 2,
        Face::Left | Face::Right => 3,
        _ => 0,
    }
}

fn ensure_slot(
    pool: &SubChunkPool,
    current: &mut Option<u32>,
    coords: ChunkCoord,
    level: u8,
    blendable: bool,
    warned: &mut bool,
) -> Option<u32> {
    let needs_new = match *current {
        None => true,
        Some(index) => {
            let slot = pool.slot(index);
            slot.level() != level
                || slot.state() != SubChunkState::TesselatingVertices
                || slot.verts_used() + 6 > pool.max_verts_per_sub_chunk()
        }
    };
    if needs_new {
        *current = pool.acquire(coords, level, blendable);
        if current.is_none() && !*warned {
            pool.warn_exhausted(coords, level);
            *warned = true;
        }
    }
    *current
}

/// Averaged (light, sky) for one face corner, sampled over the four
/// adjacent cells that are open air (NULL counts as open: no culling
/// against the unknown).
fn corner_light(chunk: &Chunk, corner: IVec3, face: usize) -> (u8, u8) {
    let mut light_sum = 0u32;
    let mut sky_sum = 0u32;
    let mut count = 0u32;
    for offset in CORNER_SAMPLES[face] {
        let pos = corner + offset;
        let sample = chunk.block_local(pos.x, pos.y, pos.z);
        if sample.is_null() || sample.is_air() {
            light_sum += sample.light_level() as u32;
            sky_sum += sample.sky_light_level() as u32;
            count += 1;
        }
    }
    if count == 0 {
        (0, 0)
    } else {
        ((light_sum / count) as u8, (sky_sum / count) as u8)
    }
}

/// Turns one chunk into compressed vertices split across sub-chunk slots,
/// one bucket per 16-block slab per render pass (opaque, blendable). Slot
/// exhaustion degrades to missing geometry, never failure.
pub fn tesselate(chunk: &Arc<Chunk>, registry: &BlockRegistry, pool: &SubChunkPool) {
    let coords = chunk.coords();
    let mut solid_slot: Option<u32> = None;
    let mut blendable_slot: Option<u32> = None;
    let mut warned = false;

    for level in 0..SUB_CHUNKS_PER_CHUNK {
        for y in (level * SUB_CHUNK_HEIGHT)..((level + 1) * SUB_CHUNK_HEIGHT) {
            for x in 0..CHUNK_DEPTH {
                for z in 0..CHUNK_WIDTH {
                    let pos = IVec3::new(x as i32, y as i32, z as i32);
                    let block = chunk.block_local(pos.x, pos.y, pos.z);
                    if block.is_null() || block.is_air() {
                        continue;
                    }
                    let format = registry.get(block.id());
                    let is_water = block.id() == WATER_ID;

                    // Cube corner grid positions; y stays chunk-absolute,
                    // the shader recovers the slab from it.
                    let corners = [
                        pos,
                        pos + IVec3::new(0, 0, 1),
                        pos + IVec3::new(1, 0, 1),
                        pos + IVec3::new(1, 0, 0),
                        pos + IVec3::new(0, 1, 0),
                        pos + IVec3::new(0, 1, 1),
                        pos + IVec3::new(1, 1, 1),
                        pos + IVec3::new(1, 1, 0),
                    ];

                    for (face_index, face) in Face::ALL.into_iter().enumerate() {
                        let neighbor_pos = pos + FACE_NEIGHBOR[face_index];
                        let neighbor =
                            chunk.block_local(neighbor_pos.x, neighbor_pos.y, neighbor_pos.z);

                        // Water shows a surface only against open air so
                        // oceans stay hollow inside; everything else shows
                        // against any see-through neighbour.
                        let visible = if is_water {
                            neighbor.is_air()
                        } else {
                            !neighbor.is_null() && neighbor.is_transparent()
                        };
                        if !visible {
                            continue;
                        }

                        let slot_ref = if format.is_blendable {
                            &mut blendable_slot
                        } else {
                            &mut solid_slot
                        };
                        let Some(slot) = ensure_slot(
                            pool,
                            slot_ref,
                            coords,
                            level as u8,
                            format.is_blendable,
                            &mut warned,
                        ) else {
                            continue;
                        };

                        let texture = match face {
                            Face::Top => format.top_texture.as_ref(),
                            Face::Bottom => format.bottom_texture.as_ref(),
                            _ => format.side_texture.as_ref(),
                        };
                        let texture_id = texture.map(|t| t.id).unwrap_or(0);
                        let tinted = match face {
                            Face::Top => format.tinted.contains(TintedFaces::TOP),
                            Face::Bottom => format.tinted.contains(TintedFaces::BOTTOM),
                            _ => format.tinted.contains(TintedFaces::SIDE),
                        };

                        let quad = FACE_CORNERS[face_index];
                        let mut light = [0u8; 4];
                        let mut sky = [0u8; 4];
                        for (i, corner_index) in quad.into_iter().enumerate() {
                            let (l, s) = corner_light(chunk, corners[corner_index], face_index);
                            light[i] = l;
                            sky[i] = s;
                        }

                        let rotation = uv_rotation(face);
                        let vertex = |corner: usize, uv: UvIndex, light_index: usize| {
                            Vertex::compress(
                                corners[quad[corner]],
                                texture_id,
                                face,
                                uv.rotated(rotation),
                                tinted,
                                light[light_index],
                                WHITE,
                                sky[light_index],
                            )
                        };
                        let verts = [
                            vertex(0, UvIndex::BottomRight, 0),
                            vertex(1, UvIndex::TopRight, 1),
                            vertex(2, UvIndex::TopLeft, 2),
                            vertex(0, UvIndex::BottomRight, 0),
                            vertex(2, UvIndex::TopLeft, 2),
                            vertex(3, UvIndex::BottomLeft, 3),
                        ];
                        pool.push_face(slot, &verts);
                    }
                }
            }
        }
    }

    pool.finish_tesselation(coords);
}
