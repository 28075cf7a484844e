use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Tunables for the chunk subsystem. Everything here is fixed for the
/// lifetime of a `World`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldConfig {
    /// Streaming radius around the player, in chunks.
    pub chunk_radius: i32,
    /// Maximum number of simultaneously loaded chunk columns.
    pub chunk_capacity: usize,
    /// Vertex bucket size of one sub-chunk slot.
    pub max_verts_per_sub_chunk: u32,
    /// Directory holding `world.bin` and `chunks/`.
    pub save_root: PathBuf,
    /// World seed; `None` picks a random seed on first load.
    pub seed: Option<u32>,
}

impl Default for WorldConfig {
    fn default() -> Self {
        let chunk_radius = 8;
        Self {
            chunk_radius,
            chunk_capacity: Self::capacity_for_radius(chunk_radius),
            max_verts_per_sub_chunk: 4500,
            save_root: PathBuf::from("world"),
            seed: None,
        }
    }
}

impl WorldConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    /// Enough columns for the full streaming disk plus one ring of slack.
    pub fn capacity_for_radius(radius: i32) -> usize {
        let side = 2 * radius as usize + 2;
        side * side
    }

    /// Total sub-chunk slots backing the vertex pool.
    pub fn sub_chunk_count(&self) -> usize {
        self.chunk_capacity * crate::world::chunk::SUB_CHUNKS_PER_CHUNK
    }
}
