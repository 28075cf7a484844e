use crate::world::block_registry::TintedFaces;

/// Declarative description of one block kind, consumed by
/// `BlockRegistry::register`. Texture fields are symbolic atlas names; the
/// registry assigns the dense texture ids.
#[derive(Debug, Clone, Copy)]
pub struct BlockDef {
    pub id: u16,
    pub name: &'static str,
    pub transparent: bool,
    pub solid: bool,
    pub blendable: bool,
    pub light_level: u8,
    pub side_texture: Option<&'static str>,
    pub top_texture: Option<&'static str>,
    pub bottom_texture: Option<&'static str>,
    pub tinted: TintedFaces,
}

impl BlockDef {
    pub const fn solid(id: u16, name: &'static str, texture: &'static str) -> Self {
        Self {
            id,
            name,
            transparent: false,
            solid: true,
            blendable: false,
            light_level: 0,
            side_texture: Some(texture),
            top_texture: Some(texture),
            bottom_texture: Some(texture),
            tinted: TintedFaces::empty(),
        }
    }
}

/// The built-in block set. Ids match the original save format, so worlds
/// written by older builds keep deserializing to the same blocks.
pub const BUILTIN_BLOCKS: &[BlockDef] = &[
    BlockDef {
        id: 1,
        name: "air",
        transparent: true,
        solid: false,
        blendable: false,
        light_level: 0,
        side_texture: None,
        top_texture: None,
        bottom_texture: None,
        tinted: TintedFaces::empty(),
    },
    BlockDef {
        id: 2,
        name: "grass",
        side_texture: Some("grass_side"),
        top_texture: Some("grass_top"),
        bottom_texture: Some("dirt"),
        tinted: TintedFaces::TOP,
        ..BlockDef::solid(2, "grass", "grass_side")
    },
    BlockDef::solid(3, "sand", "sand"),
    BlockDef::solid(4, "dirt", "dirt"),
    BlockDef::solid(5, "cobblestone", "cobblestone"),
    BlockDef::solid(6, "stone", "stone"),
    BlockDef::solid(7, "bedrock", "bedrock"),
    BlockDef {
        id: 8,
        name: "oak_log",
        side_texture: Some("oak_log"),
        top_texture: Some("oak_log_top"),
        bottom_texture: Some("oak_log_top"),
        ..BlockDef::solid(8, "oak_log", "oak_log")
    },
    BlockDef {
        id: 9,
        name: "oak_leaves",
        transparent: true,
        side_texture: Some("oak_leaves"),
        top_texture: Some("oak_leaves"),
        bottom_texture: Some("oak_leaves"),
        tinted: TintedFaces::TOP
            .union(TintedFaces::BOTTOM)
            .union(TintedFaces::SIDE),
        ..BlockDef::solid(9, "oak_leaves", "oak_leaves")
    },
    BlockDef {
        id: 10,
        name: "torch",
        transparent: true,
        solid: false,
        light_level: 15,
        side_texture: Some("torch"),
        top_texture: Some("torch"),
        bottom_texture: Some("torch"),
        ..BlockDef::solid(10, "torch", "torch")
    },
    BlockDef {
        id: 14,
        name: "glowstone",
        light_level: 31,
        ..BlockDef::solid(14, "glowstone", "glowstone")
    },
    BlockDef {
        id: 19,
        name: "water",
        transparent: true,
        solid: false,
        blendable: true,
        ..BlockDef::solid(19, "water", "water")
    },
];

/// Block id of water; the mesher suppresses water-to-water faces so oceans
/// stay hollow inside.
pub const WATER_ID: u16 = 19;
