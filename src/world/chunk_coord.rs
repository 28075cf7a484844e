use glam::{IVec3, Vec3};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::world::chunk::{CHUNK_DEPTH, CHUNK_WIDTH};

/// The four cardinal neighbour directions of a chunk column. East/west run
/// along +X/-X, south/north along +Z/-Z.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardinalDir {
    East,
    West,
    South,
    North,
}

impl CardinalDir {
    pub const ALL: [CardinalDir; 4] = [
        CardinalDir::East,
        CardinalDir::West,
        CardinalDir::South,
        CardinalDir::North,
    ];

    pub fn offset(self) -> (i32, i32) {
        match self {
            CardinalDir::East => (1, 0),
            CardinalDir::West => (-1, 0),
            CardinalDir::South => (0, 1),
            CardinalDir::North => (0, -1),
        }
    }

    pub fn index(self) -> usize {
        match self {
            CardinalDir::East => 0,
            CardinalDir::West => 1,
            CardinalDir::South => 2,
            CardinalDir::North => 3,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            CardinalDir::East => CardinalDir::West,
            CardinalDir::West => CardinalDir::East,
            CardinalDir::South => CardinalDir::North,
            CardinalDir::North => CardinalDir::South,
        }
    }
}

/// World chunk coordinate. The chunk's block origin is
/// `(x * 16, 0, z * 16)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkCoord {
    pub x: i32,
    pub z: i32,
}

impl ChunkCoord {
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    pub fn from_world(pos: Vec3) -> Self {
        Self {
            x: (pos.x / CHUNK_DEPTH as f32).floor() as i32,
            z: (pos.z / CHUNK_WIDTH as f32).floor() as i32,
        }
    }

    pub fn from_block(pos: IVec3) -> Self {
        Self {
            x: pos.x.div_euclid(CHUNK_DEPTH as i32),
            z: pos.z.div_euclid(CHUNK_WIDTH as i32),
        }
    }

    /// World-space block origin of this chunk.
    pub fn block_origin(self) -> IVec3 {
        IVec3::new(self.x * CHUNK_DEPTH as i32, 0, self.z * CHUNK_WIDTH as i32)
    }

    pub fn neighbor(self, dir: CardinalDir) -> Self {
        let (dx, dz) = dir.offset();
        Self {
            x: self.x + dx,
            z: self.z + dz,
        }
    }

    /// Squared euclidean distance in chunk units; the streaming and command
    /// priority metrics.
    pub fn distance_squared(self, other: ChunkCoord) -> i64 {
        let dx = (self.x - other.x) as i64;
        let dz = (self.z - other.z) as i64;
        dx * dx + dz * dz
    }

    /// Packs the coordinate into one word, for lock-free slot metadata and
    /// the shared player-position cell.
    pub fn pack(self) -> u64 {
        ((self.x as u32 as u64) << 32) | self.z as u32 as u64
    }

    pub fn unpack(bits: u64) -> Self {
        Self {
            x: (bits >> 32) as u32 as i32,
            z: bits as u32 as i32,
        }
    }
}

impl fmt::Display for ChunkCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}, {}>", self.x, self.z)
    }
}
