use glam::IVec3;
use log::warn;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use crate::world::block::Block;
use crate::world::block_registry::BlockRegistry;
use crate::world::chunk::{block_index, Chunk, CHUNK_DEPTH, CHUNK_HEIGHT, CHUNK_WIDTH};
use crate::world::chunk_coord::ChunkCoord;

/// The two independent 5-bit light fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Channel {
    BlockLight,
    SkyLight,
}

const DIRECTIONS: [IVec3; 6] = [
    IVec3::new(1, 0, 0),
    IVec3::new(-1, 0, 0),
    IVec3::new(0, 1, 0),
    IVec3::new(0, -1, 0),
    IVec3::new(0, 0, 1),
    IVec3::new(0, 0, -1),
];

const HORIZONTAL: [IVec3; 4] = [
    IVec3::new(1, 0, 0),
    IVec3::new(-1, 0, 0),
    IVec3::new(0, 0, 1),
    IVec3::new(0, 0, -1),
];

fn level(block: Block, channel: Channel) -> u8 {
    match channel {
        Channel::BlockLight => block.light_level(),
        Channel::SkyLight => block.sky_light_level(),
    }
}

fn with_level(block: Block, channel: Channel, value: u8) -> Block {
    match channel {
        Channel::BlockLight => block.with_light_level(value),
        Channel::SkyLight => block.with_sky_light_level(value),
    }
}

/// Whether a popped block participates in this channel's flood at all.
/// Opaque blocks terminate propagation; block-light additionally flows out
/// of opaque light sources (glowstone).
fn participates(block: Block, channel: Channel) -> bool {
    match channel {
        Channel::BlockLight => block.is_transparent() || block.is_light_source(),
        Channel::SkyLight => block.is_transparent(),
    }
}

fn read_at(chunk: &Chunk, local: IVec3) -> Block {
    chunk.blocks()[block_index(local.x as usize, local.y as usize, local.z as usize)]
}

fn write_at(chunk: &Chunk, local: IVec3, block: Block) {
    chunk.blocks_mut()[block_index(local.x as usize, local.y as usize, local.z as usize)] = block;
}

/// Breadth-first brighten pass. Queue positions are relative to `origin`
/// and may reach into neighbour chunks; every chunk written to lands in
/// `touched`.
fn propagate(
    origin: &Arc<Chunk>,
    queue: &mut VecDeque<IVec3>,
    channel: Channel,
    touched: &mut HashSet<ChunkCoord>,
) {
    while let Some(pos) = queue.pop_front() {
        let Some((chunk, local)) = origin.resolve(pos) else {
            continue;
        };
        let block = read_at(&chunk, local);
        if !participates(block, channel) {
            continue;
        }
        let value = level(block, channel);
        if value == 0 {
            continue;
        }

        for dir in DIRECTIONS {
            let neighbor_pos = pos + dir;
            let Some((neighbor_chunk, neighbor_local)) = origin.resolve(neighbor_pos) else {
                continue;
            };
            let neighbor = read_at(&neighbor_chunk, neighbor_local);
            if neighbor.is_transparent() && level(neighbor, channel) + 2 <= value {
                write_at(
                    &neighbor_chunk,
                    neighbor_local,
                    with_level(neighbor, channel, value - 1),
                );
                touched.insert(neighbor_chunk.coords());
                queue.push_back(neighbor_pos);
            }
        }
    }
}

/// Breadth-first darken pass: zeroes every block whose light flowed from
/// the removed value, and collects any strictly brighter frontier into
/// `refill` to re-flood from afterwards. `ignore_first_solid` lets the
/// freshly-placed opaque block seed its own removal.
fn remove(
    origin: &Arc<Chunk>,
    queue: &mut VecDeque<IVec3>,
    refill: &mut VecDeque<IVec3>,
    channel: Channel,
    touched: &mut HashSet<ChunkCoord>,
    mut ignore_first_solid: bool,
) {
    while let Some(pos) = queue.pop_front() {
        let ignore_solid = std::mem::replace(&mut ignore_first_solid, false);
        let Some((chunk, local)) = origin.resolve(pos) else {
            continue;
        };
        let block = read_at(&chunk, local);
        if !ignore_solid && !participates(block, channel) {
            continue;
        }

        let old = level(block, channel);
        write_at(&chunk, local, with_level(block, channel, 0));
        touched.insert(chunk.coords());

        for dir in DIRECTIONS {
            let neighbor_pos = pos + dir;
            let Some((neighbor_chunk, neighbor_local)) = origin.resolve(neighbor_pos) else {
                continue;
            };
            let neighbor = read_at(&neighbor_chunk, neighbor_local);
            let neighbor_level = level(neighbor, channel);

            // A full sky column keeps feeding straight down, so 31 -> 31
            // below still counts as lit-by-me.
            let fed_by_me = neighbor_level < old
                || (channel == Channel::SkyLight && old == Block::MAX_LIGHT && dir.y == -1);
            if neighbor_level != 0 && fed_by_me && neighbor.is_transparent() {
                queue.push_back(neighbor_pos);
                touched.insert(neighbor_chunk.coords());
            } else if neighbor_level > old {
                refill.push_back(neighbor_pos);
                touched.insert(neighbor_chunk.coords());
            }
        }
    }
}

/// Initial sky seeding: every column gets `sky = 31` from the top of the
/// chunk down to the first opaque block.
pub fn seed_sky_columns(chunk: &Chunk) {
    let mut blocks = chunk.blocks_mut();
    for x in 0..CHUNK_DEPTH {
        for z in 0..CHUNK_WIDTH {
            for y in (0..CHUNK_HEIGHT).rev() {
                let index = block_index(x, y, z);
                if !blocks[index].is_transparent() {
                    break;
                }
                blocks[index].set_sky_light_level(Block::MAX_LIGHT);
            }
        }
    }
}

/// Full lighting pass for one freshly seeded chunk: flood sky light
/// sideways out of the open columns, then flood every light-source block.
/// Returns the set of chunks whose meshes are now stale.
pub fn light_chunk(
    chunk: &Arc<Chunk>,
    registry: &BlockRegistry,
) -> HashSet<ChunkCoord> {
    let mut touched = HashSet::new();

    // Sky columns that border a darker transparent block act as sources.
    let mut sky_queue = VecDeque::new();
    'layers: for y in (0..CHUNK_HEIGHT as i32).rev() {
        let mut any_transparent = false;
        for x in 0..CHUNK_DEPTH as i32 {
            for z in 0..CHUNK_WIDTH as i32 {
                let block = chunk.block_local(x, y, z);
                if !block.is_transparent() {
                    continue;
                }
                any_transparent = true;
                if block.sky_light_level() != Block::MAX_LIGHT {
                    continue;
                }
                for dir in HORIZONTAL {
                    let neighbor = chunk.block_local(x + dir.x, y, z + dir.z);
                    if neighbor.is_transparent()
                        && neighbor.sky_light_level() != Block::MAX_LIGHT
                    {
                        sky_queue.push_back(IVec3::new(x, y, z));
                        break;
                    }
                }
            }
        }
        if !any_transparent {
            // Nothing below here ever sees the sky.
            break 'layers;
        }
    }
    propagate(chunk, &mut sky_queue, Channel::SkyLight, &mut touched);

    // Then every light-source block, at its registry brightness.
    let mut light_queue = VecDeque::new();
    {
        let mut blocks = chunk.blocks_mut();
        for y in 0..CHUNK_HEIGHT {
            for x in 0..CHUNK_DEPTH {
                for z in 0..CHUNK_WIDTH {
                    let index = block_index(x, y, z);
                    if !blocks[index].is_light_source() {
                        continue;
                    }
                    let brightness = registry.get(blocks[index].id()).light_level;
                    blocks[index].set_light_level(brightness);
                    light_queue.push_back(IVec3::new(x as i32, y as i32, z as i32));
                }
            }
        }
    }
    propagate(chunk, &mut light_queue, Channel::BlockLight, &mut touched);

    touched
}

/// Localized relight after a single block mutation at `world_pos`.
/// Distinguishes placing a solid block, removing a light source, placing a
/// light source and breaking a plain block. Returns the chunks to
/// retesselate.
pub fn recalculate(
    chunk: &Arc<Chunk>,
    world_pos: IVec3,
    removed_light_source: bool,
    registry: &BlockRegistry,
) -> HashSet<ChunkCoord> {
    let mut touched = HashSet::new();
    let local = chunk.to_local(world_pos);
    let Some((owner, owner_local)) = chunk.resolve(local) else {
        warn!("lighting update for out-of-world block at {world_pos}");
        return touched;
    };
    let updated = read_at(&owner, owner_local);

    if !updated.is_transparent() && !updated.is_light_source() && !removed_light_source {
        // Placed a solid block: darken outward from it on both channels,
        // then re-flood from whatever brighter frontier the removal found.
        for channel in [Channel::BlockLight, Channel::SkyLight] {
            let mut zero_queue = VecDeque::from([local]);
            let mut refill = VecDeque::new();
            remove(chunk, &mut zero_queue, &mut refill, channel, &mut touched, true);
            propagate(chunk, &mut refill, channel, &mut touched);
        }
    } else if removed_light_source {
        let mut zero_queue = VecDeque::from([local]);
        let mut refill = VecDeque::new();
        remove(
            chunk,
            &mut zero_queue,
            &mut refill,
            Channel::BlockLight,
            &mut touched,
            false,
        );
        propagate(chunk, &mut refill, Channel::BlockLight, &mut touched);
    } else if updated.is_light_source() {
        let brightness = registry.get(updated.id()).light_level;
        write_at(&owner, owner_local, updated.with_light_level(brightness));
        touched.insert(owner.coords());
        let mut queue = VecDeque::from([local]);
        propagate(chunk, &mut queue, Channel::BlockLight, &mut touched);
    } else {
        // Broke a plain block: the hole takes the brightest neighbour minus
        // one on both channels, and restores the full sky column when it
        // opened one up.
        let mut my_light = 0u8;
        let mut my_sky = 0u8;
        for dir in DIRECTIONS {
            let Some((neighbor_chunk, neighbor_local)) = chunk.resolve(local + dir) else {
                continue;
            };
            let neighbor = read_at(&neighbor_chunk, neighbor_local);
            my_light = my_light.max(neighbor.light_level().saturating_sub(1));
            my_sky = my_sky.max(neighbor.sky_light_level().saturating_sub(1));
            if dir.y == 1 && neighbor.sky_light_level() == Block::MAX_LIGHT {
                my_sky = Block::MAX_LIGHT;
            }
        }

        let block = read_at(&owner, owner_local);
        write_at(&owner, owner_local, block.with_light_level(my_light));
        touched.insert(owner.coords());
        let mut queue = VecDeque::from([local]);
        propagate(chunk, &mut queue, Channel::BlockLight, &mut touched);

        let block = read_at(&owner, owner_local);
        write_at(&owner, owner_local, block.with_sky_light_level(my_sky));
        let mut queue = VecDeque::from([local]);
        if my_sky == Block::MAX_LIGHT {
            // Everything transparent below the reopened column sees the sky
            // again; opaque blocks stop the restore.
            for y in (0..local.y).rev() {
                let pos = IVec3::new(local.x, y, local.z);
                let Some((col_chunk, col_local)) = chunk.resolve(pos) else {
                    break;
                };
                let below = read_at(&col_chunk, col_local);
                if !below.is_transparent() {
                    break;
                }
                write_at(
                    &col_chunk,
                    col_local,
                    below.with_sky_light_level(Block::MAX_LIGHT),
                );
                touched.insert(col_chunk.coords());
                queue.push_back(pos);
            }
        }
        propagate(chunk, &mut queue, Channel::SkyLight, &mut touched);
    }

    touched
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::chunk::ChunkState;
    use crate::world::chunk_map::ChunkMap;

    const TORCH_LEVEL: u8 = 15;

    struct Fixture {
        map: ChunkMap,
        registry: Arc<BlockRegistry>,
    }

    impl Fixture {
        /// A 3x3 neighbourhood of chunks filled with stone up to and
        /// including `surface`, air above, neighbour links patched, sky
        /// seeded and flooded.
        fn flat(surface: usize) -> Self {
            let registry = BlockRegistry::shared_default();
            let map = ChunkMap::new(16);
            let stone = registry.make_block(registry.id_of("stone"));
            let air = registry.make_block(registry.id_of("air"));
            for cx in -1..=1 {
                for cz in -1..=1 {
                    let chunk = Arc::new(Chunk::new(ChunkCoord::new(cx, cz), ChunkState::Loaded));
                    {
                        let mut blocks = chunk.blocks_mut();
                        for x in 0..CHUNK_DEPTH {
                            for z in 0..CHUNK_WIDTH {
                                for y in 0..CHUNK_HEIGHT {
                                    blocks[block_index(x, y, z)] =
                                        if y <= surface { stone } else { air };
                                }
                            }
                        }
                    }
                    map.insert(chunk).unwrap();
                }
            }
            map.patch_neighbors();
            let fixture = Self { map, registry };
            for chunk in fixture.map.snapshot() {
                seed_sky_columns(&chunk);
            }
            for chunk in fixture.map.snapshot() {
                light_chunk(&chunk, &fixture.registry);
            }
            fixture
        }

        fn center(&self) -> Arc<Chunk> {
            self.map.get(ChunkCoord::new(0, 0)).unwrap()
        }

        fn carve_pocket(&self, center: IVec3, radius: i32) {
            let chunk = self.center();
            let air = self.registry.make_block(Block::AIR_ID);
            let mut blocks = chunk.blocks_mut();
            for x in (center.x - radius)..=(center.x + radius) {
                for y in (center.y - radius)..=(center.y + radius) {
                    for z in (center.z - radius)..=(center.z + radius) {
                        blocks[block_index(x as usize, y as usize, z as usize)] = air;
                    }
                }
            }
        }

        fn place_torch(&self, pos: IVec3) -> HashSet<ChunkCoord> {
            let chunk = self.center();
            let torch = self.registry.make_block(self.registry.id_of("torch"));
            chunk.set_block_local(pos.x, pos.y, pos.z, torch);
            recalculate(&chunk, pos, false, &self.registry)
        }

        fn light_at(&self, pos: IVec3) -> u8 {
            self.center().block_local(pos.x, pos.y, pos.z).light_level()
        }

        fn sky_at(&self, pos: IVec3) -> u8 {
            self.center()
                .block_local(pos.x, pos.y, pos.z)
                .sky_light_level()
        }
    }

    #[test]
    fn torch_floods_a_dark_pocket() {
        let fixture = Fixture::flat(200); // deep underground pocket
        let center = IVec3::new(8, 64, 8);
        fixture.carve_pocket(center, 4);
        fixture.place_torch(center);

        assert_eq!(fixture.light_at(center), TORCH_LEVEL);
        assert_eq!(fixture.light_at(IVec3::new(10, 64, 8)), 13);
        assert_eq!(fixture.light_at(IVec3::new(12, 64, 8)), 11);
        // Stone wall stays dark.
        assert_eq!(fixture.light_at(IVec3::new(13, 64, 8)), 0);
        // Light decays per hop along the diagonal walls too.
        assert_eq!(fixture.light_at(IVec3::new(8, 66, 10)), 15 - 4);
    }

    #[test]
    fn removing_the_torch_darkens_the_pocket() {
        let fixture = Fixture::flat(200);
        let center = IVec3::new(8, 64, 8);
        fixture.carve_pocket(center, 4);
        fixture.place_torch(center);

        let chunk = fixture.center();
        chunk.remove_block_local(center.x, center.y, center.z);
        recalculate(&chunk, center, true, &fixture.registry);

        for x in 4..=12 {
            for y in 60..=68 {
                for z in 4..=12 {
                    assert_eq!(
                        fixture.light_at(IVec3::new(x, y, z)),
                        0,
                        "pocket block at ({x},{y},{z}) kept light"
                    );
                }
            }
        }
    }

    #[test]
    fn shaft_restores_sky_light_and_gradient_falls_off() {
        let fixture = Fixture::flat(64);
        let chunk = fixture.center();
        let (x, z) = (8, 8);

        // Dig straight down to y = 60.
        for y in (60..=64).rev() {
            chunk.remove_block_local(x, y, z);
            recalculate(&chunk, IVec3::new(x, y, z), false, &fixture.registry);
        }
        for y in 60..=64 {
            assert_eq!(fixture.sky_at(IVec3::new(x, y, z)), 31, "shaft at y={y}");
        }
        // The stone walls stay dark.
        assert_eq!(fixture.sky_at(IVec3::new(x + 1, 60, z)), 0);

        // A side tunnel at the bottom picks up the falling gradient.
        for dx in 1..=4 {
            chunk.remove_block_local(x + dx, 60, z);
            recalculate(&chunk, IVec3::new(x + dx, 60, z), false, &fixture.registry);
        }
        for dx in 1..=4 {
            assert_eq!(
                fixture.sky_at(IVec3::new(x + dx, 60, z)),
                31 - dx as u8,
                "tunnel at dx={dx}"
            );
        }
    }

    #[test]
    fn plugging_the_shaft_darkens_it_and_reopening_restores_it() {
        let fixture = Fixture::flat(64);
        let chunk = fixture.center();
        let (x, z) = (8, 8);
        for y in (60..=64).rev() {
            chunk.remove_block_local(x, y, z);
            recalculate(&chunk, IVec3::new(x, y, z), false, &fixture.registry);
        }

        // Plug at y = 63.
        let stone = fixture.registry.make_block(fixture.registry.id_of("stone"));
        chunk.set_block_local(x, 63, z, stone);
        recalculate(&chunk, IVec3::new(x, 63, z), false, &fixture.registry);

        for y in 60..=62 {
            assert_eq!(fixture.sky_at(IVec3::new(x, y, z)), 0, "plugged at y={y}");
        }
        assert_eq!(fixture.sky_at(IVec3::new(x, 64, z)), 31);

        // Re-break the plug; the column comes back.
        chunk.remove_block_local(x, 63, z);
        recalculate(&chunk, IVec3::new(x, 63, z), false, &fixture.registry);
        for y in 60..=64 {
            assert_eq!(fixture.sky_at(IVec3::new(x, y, z)), 31, "reopened at y={y}");
        }
    }

    #[test]
    fn initial_sky_seeding_matches_column_rule() {
        let fixture = Fixture::flat(64);
        let chunk = fixture.center();
        for y in 65..CHUNK_HEIGHT as i32 {
            assert_eq!(chunk.block_local(3, y, 3).sky_light_level(), 31);
        }
        for y in 0..=64 {
            assert_eq!(chunk.block_local(3, y, 3).sky_light_level(), 0);
        }
    }

    #[test]
    fn light_crosses_chunk_boundaries_with_unit_gradient() {
        let fixture = Fixture::flat(200);
        let chunk = fixture.center();
        // Pocket straddling the east boundary: x 12..20 at y 64.
        let air = fixture.registry.make_block(Block::AIR_ID);
        for x in 12..20 {
            for y in 62..=66 {
                for z in 6..=10 {
                    chunk.set_block_local(x, y, z, air);
                }
            }
        }
        let torch_pos = IVec3::new(15, 64, 8);
        let touched = fixture.place_torch(torch_pos);
        assert!(touched.contains(&ChunkCoord::new(1, 0)));

        // Walk across the seam: each step drops by exactly one.
        for x in 15..19 {
            let here = fixture.light_at(IVec3::new(x, 64, 8));
            let there = fixture.light_at(IVec3::new(x + 1, 64, 8));
            assert_eq!(here - there, 1, "gradient broke at x={x}");
        }
    }

    #[test]
    fn transparent_neighbors_never_differ_by_more_than_one() {
        let fixture = Fixture::flat(80);
        let chunk = fixture.center();
        // Rough terrain: dig pits into the surface, then relight.
        for (x, y, z) in [(4, 80, 4), (5, 80, 4), (5, 79, 4), (8, 80, 9), (8, 80, 8)] {
            chunk.remove_block_local(x, y, z);
            recalculate(&chunk, IVec3::new(x, y, z), false, &fixture.registry);
        }

        for x in 0..16 {
            for y in 78..90 {
                for z in 0..16 {
                    let here = chunk.block_local(x, y, z);
                    if !here.is_transparent() {
                        continue;
                    }
                    for dir in DIRECTIONS {
                        let neighbor = chunk.block_local(x + dir.x, y + dir.y, z + dir.z);
                        if neighbor.is_null() || !neighbor.is_transparent() {
                            continue;
                        }
                        let diff = (here.sky_light_level() as i32
                            - neighbor.sky_light_level() as i32)
                            .abs();
                        assert!(diff <= 1, "sky gradient {diff} at ({x},{y},{z})");
                    }
                }
            }
        }
    }
}
