use crate::world::block::Block;
use crate::world::blocks_data::{BlockDef, BUILTIN_BLOCKS};
use bitflags::bitflags;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

bitflags! {
    /// Faces whose texture is tinted by the biome colour map.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct TintedFaces: u8 {
        const TOP = 1 << 0;
        const BOTTOM = 1 << 1;
        const SIDE = 1 << 2;
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("duplicate block id {0}")]
    DuplicateId(u16),
    #[error("duplicate block name '{0}'")]
    DuplicateName(String),
}

/// A texture name together with the dense id the renderer's atlas uses.
#[derive(Debug, Clone)]
pub struct TextureRef {
    pub name: String,
    pub id: u16,
}

/// Per-id block properties. Immutable once the registry is built.
#[derive(Debug, Clone)]
pub struct BlockFormat {
    pub name: String,
    pub is_transparent: bool,
    pub is_solid: bool,
    pub is_blendable: bool,
    pub is_light_source: bool,
    pub light_level: u8,
    pub side_texture: Option<TextureRef>,
    pub top_texture: Option<TextureRef>,
    pub bottom_texture: Option<TextureRef>,
    pub tinted: TintedFaces,
}

impl BlockFormat {
    fn null() -> Self {
        Self {
            name: String::new(),
            is_transparent: false,
            is_solid: false,
            is_blendable: false,
            is_light_source: false,
            light_level: 0,
            side_texture: None,
            top_texture: None,
            bottom_texture: None,
            tinted: TintedFaces::empty(),
        }
    }
}

/// Static lookup of per-block-id properties. Built once before the world
/// starts; afterwards it is only ever read, so it is shared freely between
/// the main thread and the chunk worker without locks.
pub struct BlockRegistry {
    formats: Vec<BlockFormat>,
    by_name: HashMap<String, u16>,
    texture_ids: HashMap<String, u16>,
}

impl BlockRegistry {
    pub fn new() -> Self {
        Self {
            formats: vec![BlockFormat::null()],
            by_name: HashMap::new(),
            texture_ids: HashMap::new(),
        }
    }

    pub fn with_default_blocks() -> Self {
        let mut registry = Self::new();
        for def in BUILTIN_BLOCKS {
            registry
                .register(def)
                .expect("builtin block table is well-formed");
        }
        registry
    }

    /// A process-shared default registry, handy for tests and tools that do
    /// not customize the block set.
    pub fn shared_default() -> Arc<BlockRegistry> {
        static DEFAULT: Lazy<Arc<BlockRegistry>> =
            Lazy::new(|| Arc::new(BlockRegistry::with_default_blocks()));
        DEFAULT.clone()
    }

    pub fn register(&mut self, def: &BlockDef) -> Result<(), RegistryError> {
        let id = def.id as usize;
        if id < self.formats.len() && !self.formats[id].name.is_empty() {
            return Err(RegistryError::DuplicateId(def.id));
        }
        if self.by_name.contains_key(def.name) {
            return Err(RegistryError::DuplicateName(def.name.to_string()));
        }

        if id >= self.formats.len() {
            self.formats.resize(id + 1, BlockFormat::null());
        }

        let side_texture = def.side_texture.map(|name| self.intern_texture(name));
        let top_texture = def.top_texture.map(|name| self.intern_texture(name));
        let bottom_texture = def.bottom_texture.map(|name| self.intern_texture(name));

        self.formats[id] = BlockFormat {
            name: def.name.to_string(),
            is_transparent: def.transparent,
            is_solid: def.solid,
            is_blendable: def.blendable,
            is_light_source: def.light_level > 0,
            light_level: def.light_level,
            side_texture,
            top_texture,
            bottom_texture,
            tinted: def.tinted,
        };
        self.by_name.insert(def.name.to_string(), def.id);
        Ok(())
    }

    fn intern_texture(&mut self, name: &str) -> TextureRef {
        let next_id = self.texture_ids.len() as u16;
        let id = *self
            .texture_ids
            .entry(name.to_string())
            .or_insert(next_id);
        TextureRef {
            name: name.to_string(),
            id,
        }
    }

    /// Out-of-range ids resolve to the zero entry.
    pub fn get(&self, id: u16) -> &BlockFormat {
        self.formats.get(id as usize).unwrap_or(&self.formats[0])
    }

    /// Unknown names resolve to the NULL id.
    pub fn id_of(&self, name: &str) -> u16 {
        self.by_name.get(name).copied().unwrap_or(Block::NULL_ID)
    }

    /// Builds a runtime block for `id` with the cached flag bits filled in
    /// and light fields cleared.
    pub fn make_block(&self, id: u16) -> Block {
        let format = self.get(id);
        Block::new(
            id,
            format.is_transparent,
            format.is_light_source,
            format.is_blendable,
        )
    }

    /// Number of distinct textures referenced by registered blocks.
    pub fn texture_count(&self) -> usize {
        self.texture_ids.len()
    }

    pub fn texture_id(&self, name: &str) -> Option<u16> {
        self.texture_ids.get(name).copied()
    }
}

impl Default for BlockRegistry {
    fn default() -> Self {
        Self::with_default_blocks()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookups_fall_back_to_null() {
        let registry = BlockRegistry::with_default_blocks();
        assert_eq!(registry.id_of("no_such_block"), 0);
        let format = registry.get(9999);
        assert!(format.name.is_empty());
        assert!(!format.is_solid);
    }

    #[test]
    fn builtin_blocks_resolve() {
        let registry = BlockRegistry::with_default_blocks();
        let stone = registry.id_of("stone");
        assert_ne!(stone, 0);
        assert!(registry.get(stone).is_solid);

        let water = registry.id_of("water");
        assert!(registry.get(water).is_transparent);
        assert!(registry.get(water).is_blendable);

        let torch = registry.id_of("torch");
        assert!(registry.get(torch).is_light_source);
        assert_eq!(registry.get(torch).light_level, 15);
    }

    #[test]
    fn make_block_caches_flags() {
        let registry = BlockRegistry::with_default_blocks();
        let water = registry.make_block(registry.id_of("water"));
        assert!(water.is_transparent());
        assert!(water.is_blendable());
        assert_eq!(water.light_level(), 0);
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = BlockRegistry::with_default_blocks();
        let dup = BlockDef {
            id: registry.id_of("stone"),
            name: "stone2",
            ..BlockDef::solid(0, "x", "stone")
        };
        assert!(matches!(
            registry.register(&dup),
            Err(RegistryError::DuplicateId(_))
        ));
    }

    #[test]
    fn texture_ids_are_dense_and_stable() {
        let registry = BlockRegistry::with_default_blocks();
        let count = registry.texture_count();
        assert!(count > 0);
        let grass_top = registry.texture_id("grass_top").unwrap();
        assert!((grass_top as usize) < count);
    }
}
