use bytemuck::{Pod, Zeroable};

const ID_MASK: u32 = 0x0000_FFFF;
const LIGHT_SHIFT: u32 = 16;
const LIGHT_MASK: u32 = 0x1F << LIGHT_SHIFT;
const SKY_LIGHT_SHIFT: u32 = 21;
const SKY_LIGHT_MASK: u32 = 0x1F << SKY_LIGHT_SHIFT;
const TRANSPARENT_BIT: u32 = 1 << 26;
const LIGHT_SOURCE_BIT: u32 = 1 << 27;
const BLENDABLE_BIT: u32 = 1 << 28;

/// One voxel, packed into 32 bits: the registry id, the two flood-filled
/// light values and three flags cached off the registry so the lighting and
/// meshing hot paths never have to chase the format table.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct Block(u32);

impl Block {
    /// Sentinel for "no chunk here". Never stored in a loaded chunk.
    pub const NULL: Block = Block(0);

    pub const NULL_ID: u16 = 0;
    pub const AIR_ID: u16 = 1;

    pub const MAX_LIGHT: u8 = 31;

    pub fn new(id: u16, transparent: bool, light_source: bool, blendable: bool) -> Self {
        let mut bits = id as u32;
        if transparent {
            bits |= TRANSPARENT_BIT;
        }
        if light_source {
            bits |= LIGHT_SOURCE_BIT;
        }
        if blendable {
            bits |= BLENDABLE_BIT;
        }
        Block(bits)
    }

    pub fn air() -> Self {
        Block::new(Self::AIR_ID, true, false, false)
    }

    pub fn id(self) -> u16 {
        (self.0 & ID_MASK) as u16
    }

    pub fn is_null(self) -> bool {
        self.id() == Self::NULL_ID
    }

    pub fn is_air(self) -> bool {
        self.id() == Self::AIR_ID
    }

    pub fn is_transparent(self) -> bool {
        self.0 & TRANSPARENT_BIT != 0
    }

    pub fn is_light_source(self) -> bool {
        self.0 & LIGHT_SOURCE_BIT != 0
    }

    pub fn is_blendable(self) -> bool {
        self.0 & BLENDABLE_BIT != 0
    }

    pub fn light_level(self) -> u8 {
        ((self.0 & LIGHT_MASK) >> LIGHT_SHIFT) as u8
    }

    pub fn sky_light_level(self) -> u8 {
        ((self.0 & SKY_LIGHT_MASK) >> SKY_LIGHT_SHIFT) as u8
    }

    pub fn set_light_level(&mut self, level: u8) {
        debug_assert!(level <= Self::MAX_LIGHT);
        self.0 = (self.0 & !LIGHT_MASK) | ((level as u32) << LIGHT_SHIFT);
    }

    pub fn set_sky_light_level(&mut self, level: u8) {
        debug_assert!(level <= Self::MAX_LIGHT);
        self.0 = (self.0 & !SKY_LIGHT_MASK) | ((level as u32) << SKY_LIGHT_SHIFT);
    }

    pub fn with_light_level(mut self, level: u8) -> Self {
        self.set_light_level(level);
        self
    }

    pub fn with_sky_light_level(mut self, level: u8) -> Self {
        self.set_sky_light_level(level);
        self
    }

    /// Raw packed form; the block-mutation wire frames carry this word.
    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn from_bits(bits: u32) -> Self {
        Block(bits)
    }
}

impl Default for Block {
    fn default() -> Self {
        Block::NULL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_and_unpacks_fields() {
        let mut block = Block::new(19, true, false, true);
        assert_eq!(block.id(), 19);
        assert!(block.is_transparent());
        assert!(!block.is_light_source());
        assert!(block.is_blendable());

        block.set_light_level(13);
        block.set_sky_light_level(31);
        assert_eq!(block.light_level(), 13);
        assert_eq!(block.sky_light_level(), 31);
        assert_eq!(block.id(), 19);

        block.set_light_level(0);
        assert_eq!(block.light_level(), 0);
        assert_eq!(block.sky_light_level(), 31);
    }

    #[test]
    fn null_and_air_sentinels() {
        assert!(Block::NULL.is_null());
        assert!(!Block::NULL.is_transparent());
        let air = Block::air();
        assert!(air.is_air());
        assert!(air.is_transparent());
    }
}
