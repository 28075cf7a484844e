pub mod bridge;
pub mod frustum;
pub mod pool;
pub mod shader;
pub mod vertex;

pub use bridge::{ChunkRenderer, CompositeTargets, DrawArraysIndirectCommand, DrawCommand};
pub use frustum::Frustum;
pub use pool::{SubChunkPool, SubChunkState, VertexArena};
pub use shader::ShaderProgram;
pub use vertex::{Face, UvIndex, Vertex};
