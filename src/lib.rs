pub mod config;
pub mod net;
pub mod render;
pub mod world;

pub use config::WorldConfig;
pub use world::block::Block;
pub use world::block_registry::{BlockFormat, BlockRegistry};
pub use world::chunk::{Chunk, ChunkState, CHUNK_DEPTH, CHUNK_HEIGHT, CHUNK_WIDTH};
pub use world::chunk_coord::ChunkCoord;
pub use world::core::World;
