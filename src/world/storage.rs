use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::warn;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::world::block::Block;
use crate::world::block_registry::BlockRegistry;
use crate::world::chunk::{Chunk, CHUNK_VOLUME};
use crate::world::chunk_coord::ChunkCoord;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("corrupt chunk data: {0}")]
    Corrupt(&'static str),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Serialized chunk layout, little-endian throughout:
///
/// ```text
/// u32  compressed_size            bytes of RLE payload
/// repeat until compressed_size bytes consumed:
///     u16 block_id
///     u16 run_length
/// i32  chunk_x
/// i32  chunk_z
/// ```
///
/// Runs cover all 65,536 blocks in flat index order and never span blocks
/// with differing ids. Runs cap at 65,535 (the u16 limit), so a uniform
/// chunk encodes as two runs.
pub fn write_blocks<W: Write>(
    w: &mut W,
    blocks: &[Block],
    coords: ChunkCoord,
) -> Result<(), StorageError> {
    debug_assert_eq!(blocks.len(), CHUNK_VOLUME);

    let mut runs: Vec<(u16, u16)> = Vec::with_capacity(256);
    let mut last_id = blocks[0].id();
    let mut run_len: u32 = 0;
    for block in blocks {
        if block.id() != last_id || run_len == u16::MAX as u32 {
            runs.push((last_id, run_len as u16));
            last_id = block.id();
            run_len = 0;
        }
        run_len += 1;
    }
    runs.push((last_id, run_len as u16));

    w.write_u32::<LittleEndian>(runs.len() as u32 * 4)?;
    for (id, len) in runs {
        w.write_u16::<LittleEndian>(id)?;
        w.write_u16::<LittleEndian>(len)?;
    }
    w.write_i32::<LittleEndian>(coords.x)?;
    w.write_i32::<LittleEndian>(coords.z)?;
    Ok(())
}

/// Decodes one serialized chunk, rehydrating the cached flag bits from the
/// registry and clearing the light fields (they are recomputed after load).
pub fn read_blocks<R: Read>(
    r: &mut R,
    registry: &BlockRegistry,
) -> Result<(Box<[Block]>, ChunkCoord), StorageError> {
    let compressed_size = r.read_u32::<LittleEndian>()?;
    if compressed_size % 4 != 0 {
        return Err(StorageError::Corrupt("payload size not a run multiple"));
    }

    let mut blocks = vec![Block::NULL; CHUNK_VOLUME].into_boxed_slice();
    let mut cursor = 0usize;
    let mut consumed = 0u32;
    while consumed < compressed_size {
        let id = r.read_u16::<LittleEndian>()?;
        let run_len = r.read_u16::<LittleEndian>()? as usize;
        consumed += 4;

        if cursor + run_len > CHUNK_VOLUME {
            return Err(StorageError::Corrupt("run overflows chunk volume"));
        }
        let block = registry.make_block(id);
        blocks[cursor..cursor + run_len].fill(block);
        cursor += run_len;
    }
    if cursor != CHUNK_VOLUME {
        return Err(StorageError::Corrupt("runs do not cover chunk volume"));
    }

    let x = r.read_i32::<LittleEndian>()?;
    let z = r.read_i32::<LittleEndian>()?;
    Ok((blocks, ChunkCoord::new(x, z)))
}

pub fn chunks_dir(save_root: &Path) -> PathBuf {
    save_root.join("chunks")
}

pub fn chunk_file_path(save_root: &Path, coords: ChunkCoord) -> PathBuf {
    chunks_dir(save_root).join(format!("{}_{}.bin", coords.x, coords.z))
}

pub fn chunk_file_exists(save_root: &Path, coords: ChunkCoord) -> bool {
    chunk_file_path(save_root, coords).is_file()
}

/// Writes a chunk's blocks to its save file.
pub fn save_chunk(save_root: &Path, chunk: &Chunk) -> Result<(), StorageError> {
    std::fs::create_dir_all(chunks_dir(save_root))?;
    let path = chunk_file_path(save_root, chunk.coords());
    let mut w = BufWriter::new(File::create(path)?);
    let blocks = chunk.blocks();
    write_blocks(&mut w, &blocks, chunk.coords())?;
    w.flush()?;
    Ok(())
}

/// Loads a chunk's blocks from disk. `Ok(None)` when no file exists (the
/// caller generates from seed instead); corrupt files are reported so the
/// caller can discard and regenerate.
pub fn load_chunk_blocks(
    save_root: &Path,
    coords: ChunkCoord,
    registry: &BlockRegistry,
) -> Result<Option<Box<[Block]>>, StorageError> {
    let path = chunk_file_path(save_root, coords);
    let file = match File::open(&path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let mut r = BufReader::new(file);
    let (blocks, stored_coords) = read_blocks(&mut r, registry)?;
    if stored_coords != coords {
        warn!(
            "chunk file {} claims coordinates {}",
            path.display(),
            stored_coords
        );
        return Err(StorageError::Corrupt("stored coordinates do not match"));
    }
    Ok(Some(blocks))
}

/// `<world>/world.bin` holds the little-endian u32 seed.
pub fn save_world_seed(save_root: &Path, seed: u32) -> Result<(), StorageError> {
    std::fs::create_dir_all(save_root)?;
    let mut w = File::create(save_root.join("world.bin"))?;
    w.write_u32::<LittleEndian>(seed)?;
    Ok(())
}

pub fn load_world_seed(save_root: &Path) -> Result<Option<u32>, StorageError> {
    let mut file = match File::open(save_root.join("world.bin")) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    Ok(Some(file.read_u32::<LittleEndian>()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::chunk::{block_index, ChunkState};
    use std::io::Cursor;

    fn test_blocks(registry: &BlockRegistry) -> Box<[Block]> {
        let stone = registry.make_block(registry.id_of("stone"));
        let air = registry.make_block(registry.id_of("air"));
        let mut blocks = vec![air; CHUNK_VOLUME].into_boxed_slice();
        for x in 0..16 {
            for z in 0..16 {
                for y in 0..64 {
                    blocks[block_index(x, y, z)] = stone;
                }
            }
        }
        blocks[block_index(3, 70, 9)] = registry.make_block(7);
        blocks
    }

    #[test]
    fn roundtrip_preserves_blocks() {
        let registry = BlockRegistry::shared_default();
        let blocks = test_blocks(&registry);
        let coords = ChunkCoord::new(-3, 12);

        let mut buffer = Vec::new();
        write_blocks(&mut buffer, &blocks, coords).unwrap();
        let (decoded, decoded_coords) = read_blocks(&mut Cursor::new(&buffer), &registry).unwrap();

        assert_eq!(decoded_coords, coords);
        assert_eq!(&decoded[..], &blocks[..]);
    }

    #[test]
    fn uniform_chunk_splits_runs_at_u16_max() {
        let registry = BlockRegistry::shared_default();
        let stone = registry.make_block(registry.id_of("stone"));
        let blocks = vec![stone; CHUNK_VOLUME].into_boxed_slice();

        let mut buffer = Vec::new();
        write_blocks(&mut buffer, &blocks, ChunkCoord::new(0, 0)).unwrap();

        let mut cursor = Cursor::new(&buffer);
        let size = cursor.read_u32::<LittleEndian>().unwrap();
        assert_eq!(size, 8); // two runs: 65535 + 1
        let (decoded, _) = read_blocks(&mut Cursor::new(&buffer), &registry).unwrap();
        assert_eq!(&decoded[..], &blocks[..]);
    }

    #[test]
    fn flags_rehydrate_and_light_clears() {
        let registry = BlockRegistry::shared_default();
        let water = registry
            .make_block(registry.id_of("water"))
            .with_sky_light_level(31);
        let blocks = vec![water; CHUNK_VOLUME].into_boxed_slice();

        let mut buffer = Vec::new();
        write_blocks(&mut buffer, &blocks, ChunkCoord::new(0, 0)).unwrap();
        let (decoded, _) = read_blocks(&mut Cursor::new(&buffer), &registry).unwrap();

        assert!(decoded[0].is_transparent());
        assert!(decoded[0].is_blendable());
        assert_eq!(decoded[0].sky_light_level(), 0);
    }

    #[test]
    fn corrupt_payloads_are_rejected() {
        let registry = BlockRegistry::shared_default();

        // Size not a multiple of a run record.
        let mut buffer = Vec::new();
        buffer.write_u32::<LittleEndian>(6).unwrap();
        assert!(matches!(
            read_blocks(&mut Cursor::new(&buffer), &registry),
            Err(StorageError::Corrupt(_))
        ));

        // Runs that do not cover the chunk.
        let mut buffer = Vec::new();
        buffer.write_u32::<LittleEndian>(4).unwrap();
        buffer.write_u16::<LittleEndian>(1).unwrap();
        buffer.write_u16::<LittleEndian>(100).unwrap();
        buffer.write_i32::<LittleEndian>(0).unwrap();
        buffer.write_i32::<LittleEndian>(0).unwrap();
        assert!(matches!(
            read_blocks(&mut Cursor::new(&buffer), &registry),
            Err(StorageError::Corrupt(_))
        ));

        // Truncated stream.
        let mut buffer = Vec::new();
        buffer.write_u32::<LittleEndian>(4).unwrap();
        assert!(matches!(
            read_blocks(&mut Cursor::new(&buffer), &registry),
            Err(StorageError::Io(_))
        ));
    }

    #[test]
    fn chunk_files_roundtrip_on_disk() {
        let registry = BlockRegistry::shared_default();
        let dir = tempfile::tempdir().unwrap();
        let coords = ChunkCoord::new(5, -2);

        let chunk = Chunk::new(coords, ChunkState::Loaded);
        {
            let mut blocks = chunk.blocks_mut();
            blocks.copy_from_slice(&test_blocks(&registry));
        }

        assert!(!chunk_file_exists(dir.path(), coords));
        save_chunk(dir.path(), &chunk).unwrap();
        assert!(chunk_file_exists(dir.path(), coords));

        let loaded = load_chunk_blocks(dir.path(), coords, &registry)
            .unwrap()
            .unwrap();
        assert_eq!(&loaded[..], &chunk.blocks()[..]);

        // Missing files are not an error.
        assert!(load_chunk_blocks(dir.path(), ChunkCoord::new(9, 9), &registry)
            .unwrap()
            .is_none());
    }

    #[test]
    fn world_seed_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_world_seed(dir.path()).unwrap().is_none());
        save_world_seed(dir.path(), 0xDEAD_BEEF).unwrap();
        assert_eq!(load_world_seed(dir.path()).unwrap(), Some(0xDEAD_BEEF));
    }
}
