pub mod block;
pub mod block_registry;
pub mod blocks_data;
pub mod chunk;
pub mod chunk_coord;
pub mod chunk_map;
pub mod core;
pub mod generator;
pub mod lighting;
pub mod mesher;
pub mod storage;
pub mod streaming;
pub mod worker;

pub use block::Block;
pub use block_registry::{BlockFormat, BlockRegistry};
pub use chunk::{Chunk, ChunkState};
pub use chunk_coord::{CardinalDir, ChunkCoord};
pub use chunk_map::ChunkMap;
pub use self::core::World;
