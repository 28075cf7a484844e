use bytemuck::{Pod, Zeroable};
use glam::IVec3;

// word 1
const POSITION_INDEX_MASK: u32 = 0x0001_FFFF;
const TEX_ID_MASK: u32 = 0x1FFE_0000;
const FACE_MASK: u32 = 0xE000_0000;

// word 2
const UV_INDEX_MASK: u32 = 0x3;
const BIOME_COLOR_MASK: u32 = 0x4;
const LIGHT_LEVEL_MASK: u32 = 0xF8;
const LIGHT_COLOR_R_MASK: u32 = 0x0070_0;
const LIGHT_COLOR_G_MASK: u32 = 0x0380_0;
const LIGHT_COLOR_B_MASK: u32 = 0x1C00_0;
const SKY_LIGHT_MASK: u32 = 0x003E_0000;

// Positions index the 17x17x17 grid of cell corners in a sub-chunk.
const BASE_17_DEPTH: i32 = 17;
const BASE_17_HEIGHT: i32 = 17 * 17;

/// The six cube faces, in the order the mesher checks neighbours and the
/// shader decodes normals. Left/right run along Z, back/front along X.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Face {
    Left = 0,
    Right = 1,
    Bottom = 2,
    Top = 3,
    Back = 4,
    Front = 5,
}

impl Face {
    pub const ALL: [Face; 6] = [
        Face::Left,
        Face::Right,
        Face::Bottom,
        Face::Top,
        Face::Back,
        Face::Front,
    ];
}

/// Which texture corner a vertex samples. The shader holds the actual UVs;
/// the index is rotated per face so orientation matches the right-handed
/// world.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum UvIndex {
    TopRight = 0,
    TopLeft = 1,
    BottomLeft = 2,
    BottomRight = 3,
}

impl UvIndex {
    pub fn rotated(self, by: u32) -> UvIndex {
        match (self as u32 + by) % 4 {
            0 => UvIndex::TopRight,
            1 => UvIndex::TopLeft,
            2 => UvIndex::BottomLeft,
            _ => UvIndex::BottomRight,
        }
    }
}

/// One compressed chunk vertex: 8 bytes, two u32 words. The bit layout is
/// part of the shader contract:
///
/// word1: bits 0-16 position index, 17-28 texture id, 29-31 face.
/// word2: bits 0-1 uv index, 2 biome-colour flag, 3-7 light level,
///        8-10 r, 11-13 g, 14-16 b, 17-21 sky light.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct Vertex {
    pub data1: u32,
    pub data2: u32,
}

impl Vertex {
    #[allow(clippy::too_many_arguments)]
    pub fn compress(
        corner: IVec3,
        texture_id: u16,
        face: Face,
        uv: UvIndex,
        color_by_biome: bool,
        light_level: u8,
        light_color: (u8, u8, u8),
        sky_light_level: u8,
    ) -> Self {
        let position_index = corner.x * BASE_17_DEPTH + corner.y * BASE_17_HEIGHT + corner.z;

        let mut data1 = 0u32;
        data1 |= (position_index as u32) & POSITION_INDEX_MASK;
        data1 |= ((texture_id as u32) << 17) & TEX_ID_MASK;
        data1 |= ((face as u32) << 29) & FACE_MASK;

        let mut data2 = 0u32;
        data2 |= (uv as u32) & UV_INDEX_MASK;
        data2 |= ((color_by_biome as u32) << 2) & BIOME_COLOR_MASK;
        data2 |= ((light_level as u32) << 3) & LIGHT_LEVEL_MASK;
        data2 |= ((light_color.0 as u32) << 8) & LIGHT_COLOR_R_MASK;
        data2 |= ((light_color.1 as u32) << 11) & LIGHT_COLOR_G_MASK;
        data2 |= ((light_color.2 as u32) << 14) & LIGHT_COLOR_B_MASK;
        data2 |= ((sky_light_level as u32) << 17) & SKY_LIGHT_MASK;

        Vertex { data1, data2 }
    }

    pub fn corner(self) -> IVec3 {
        let index = (self.data1 & POSITION_INDEX_MASK) as i32;
        let z = index % BASE_17_DEPTH;
        let x = (index % BASE_17_HEIGHT) / BASE_17_DEPTH;
        let y = (index - x * BASE_17_DEPTH - z) / BASE_17_HEIGHT;
        IVec3::new(x, y, z)
    }

    pub fn texture_id(self) -> u16 {
        ((self.data1 & TEX_ID_MASK) >> 17) as u16
    }

    pub fn face(self) -> u32 {
        (self.data1 & FACE_MASK) >> 29
    }

    pub fn uv_index(self) -> u32 {
        self.data2 & UV_INDEX_MASK
    }

    pub fn color_by_biome(self) -> bool {
        self.data2 & BIOME_COLOR_MASK != 0
    }

    pub fn light_level(self) -> u8 {
        ((self.data2 & LIGHT_LEVEL_MASK) >> 3) as u8
    }

    pub fn sky_light_level(self) -> u8 {
        ((self.data2 & SKY_LIGHT_MASK) >> 17) as u8
    }
}
