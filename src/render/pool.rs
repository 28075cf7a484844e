use log::warn;
use parking_lot::Mutex;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};

use crate::render::vertex::Vertex;
use crate::world::chunk_coord::ChunkCoord;

/// Lifecycle of one vertex bucket. The worker owns a slot from
/// `TesselatingVertices` until it parks it in a terminal state; the
/// renderer only ever observes `UploadVerticesToGpu`, `Uploaded`,
/// `RetesselateVertices` and `DoneRetesselating`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SubChunkState {
    Unloaded = 0,
    TesselatingVertices = 1,
    RetesselateVertices = 2,
    UploadVerticesToGpu = 3,
    Uploaded = 4,
    DoneRetesselating = 5,
}

impl SubChunkState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SubChunkState::Unloaded,
            1 => SubChunkState::TesselatingVertices,
            2 => SubChunkState::RetesselateVertices,
            3 => SubChunkState::UploadVerticesToGpu,
            4 => SubChunkState::Uploaded,
            _ => SubChunkState::DoneRetesselating,
        }
    }
}

enum Backing {
    /// CPU memory; headless servers and tests.
    Host(Box<[Vertex]>),
    /// A persistently-mapped coherent GPU buffer. The mapping must stay
    /// valid for the arena's lifetime.
    Mapped { len: usize },
}

/// The single vertex allocation every sub-chunk slot carves its bucket out
/// of. Slot `i` writes `[i * max_verts, (i + 1) * max_verts)`; nothing on
/// the CPU ever reads a mapped arena back.
pub struct VertexArena {
    base: NonNull<Vertex>,
    backing: Backing,
}

// One writer per claimed slot (the worker), no CPU readers of mapped
// memory, and slot claims are handed out under the pool's free-list mutex.
unsafe impl Send for VertexArena {}
unsafe impl Sync for VertexArena {}

impl VertexArena {
    pub fn host(total_verts: usize) -> Self {
        let mut memory = vec![Vertex::default(); total_verts].into_boxed_slice();
        let base = NonNull::new(memory.as_mut_ptr()).expect("allocation");
        Self {
            base,
            backing: Backing::Host(memory),
        }
    }

    /// Wraps a persistently-mapped GPU pointer.
    ///
    /// # Safety
    /// `base` must point at a coherent write-mapping of at least
    /// `total_verts` vertices that outlives the arena.
    pub unsafe fn mapped(base: *mut Vertex, total_verts: usize) -> Self {
        Self {
            base: NonNull::new(base).expect("mapped pointer"),
            backing: Backing::Mapped { len: total_verts },
        }
    }

    pub fn len(&self) -> usize {
        match &self.backing {
            Backing::Host(memory) => memory.len(),
            Backing::Mapped { len } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn write(&self, offset: usize, verts: &[Vertex]) {
        debug_assert!(offset + verts.len() <= self.len());
        // SAFETY: bounds asserted above; the caller holds the slot claim
        // covering this range, so no other thread writes it.
        unsafe {
            std::ptr::copy_nonoverlapping(
                verts.as_ptr(),
                self.base.as_ptr().add(offset),
                verts.len(),
            );
        }
    }

    fn read(&self, offset: usize, count: usize) -> &[Vertex] {
        debug_assert!(offset + count <= self.len());
        // SAFETY: only meaningful for host arenas (tests, headless); the
        // range belongs to a slot in a terminal state.
        unsafe { std::slice::from_raw_parts(self.base.as_ptr().add(offset), count) }
    }
}

/// One fixed-capacity vertex bucket. `first` doubles as the draw command's
/// base vertex; the coordinate/level/blendable metadata is atomic so the
/// renderer can read it right after observing a terminal state.
pub struct SubChunkSlot {
    state: AtomicU8,
    verts_used: AtomicU32,
    first: u32,
    coords: AtomicU64,
    level: AtomicU8,
    blendable: AtomicBool,
}

impl SubChunkSlot {
    pub fn state(&self) -> SubChunkState {
        SubChunkState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: SubChunkState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// `Uploaded -> RetesselateVertices` etc.; fails if the slot moved on.
    pub fn transition(&self, from: SubChunkState, to: SubChunkState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn verts_used(&self) -> u32 {
        self.verts_used.load(Ordering::Acquire)
    }

    pub fn first(&self) -> u32 {
        self.first
    }

    pub fn coords(&self) -> ChunkCoord {
        ChunkCoord::unpack(self.coords.load(Ordering::Acquire))
    }

    pub fn level(&self) -> u8 {
        self.level.load(Ordering::Acquire)
    }

    pub fn is_blendable(&self) -> bool {
        self.blendable.load(Ordering::Acquire)
    }
}

/// Fixed array of sub-chunk slots over one vertex arena, with a free-list
/// stack. Slot count and bucket size are fixed at construction; exhaustion
/// is a soft failure surfaced to the mesher.
pub struct SubChunkPool {
    slots: Box<[SubChunkSlot]>,
    free: Mutex<Vec<u32>>,
    arena: VertexArena,
    max_verts_per_sub_chunk: u32,
}

impl SubChunkPool {
    pub fn new(slot_count: usize, max_verts_per_sub_chunk: u32, arena: VertexArena) -> Self {
        assert!(
            arena.len() >= slot_count * max_verts_per_sub_chunk as usize,
            "vertex arena smaller than the slot table"
        );
        let slots: Box<[SubChunkSlot]> = (0..slot_count)
            .map(|i| SubChunkSlot {
                state: AtomicU8::new(SubChunkState::Unloaded as u8),
                verts_used: AtomicU32::new(0),
                first: i as u32 * max_verts_per_sub_chunk,
                coords: AtomicU64::new(ChunkCoord::new(0, 0).pack()),
                level: AtomicU8::new(0),
                blendable: AtomicBool::new(false),
            })
            .collect();
        // Stack order: low indices come back first.
        let free = (0..slot_count as u32).rev().collect();
        Self {
            slots,
            free: Mutex::new(free),
            arena,
            max_verts_per_sub_chunk,
        }
    }

    /// Convenience constructor over host memory.
    pub fn host(slot_count: usize, max_verts_per_sub_chunk: u32) -> Self {
        let arena = VertexArena::host(slot_count * max_verts_per_sub_chunk as usize);
        Self::new(slot_count, max_verts_per_sub_chunk, arena)
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn max_verts_per_sub_chunk(&self) -> u32 {
        self.max_verts_per_sub_chunk
    }

    pub fn free_count(&self) -> usize {
        self.free.lock().len()
    }

    pub fn slots(&self) -> &[SubChunkSlot] {
        &self.slots
    }

    pub fn slot(&self, index: u32) -> &SubChunkSlot {
        &self.slots[index as usize]
    }

    /// Claims a slot for tesselation. `None` when the pool is exhausted;
    /// the caller drops that bucket's geometry and the world stays correct,
    /// just unrendered until a slot frees.
    pub fn acquire(
        &self,
        coords: ChunkCoord,
        level: u8,
        blendable: bool,
    ) -> Option<u32> {
        let index = self.free.lock().pop()?;
        let slot = &self.slots[index as usize];
        debug_assert_eq!(slot.state(), SubChunkState::Unloaded);
        slot.verts_used.store(0, Ordering::Release);
        slot.coords.store(coords.pack(), Ordering::Release);
        slot.level.store(level, Ordering::Release);
        slot.blendable.store(blendable, Ordering::Release);
        slot.set_state(SubChunkState::TesselatingVertices);
        Some(index)
    }

    /// Returns a slot to the free list.
    pub fn release(&self, index: u32) {
        let slot = &self.slots[index as usize];
        debug_assert_ne!(slot.state(), SubChunkState::Unloaded, "double release");
        slot.verts_used.store(0, Ordering::Release);
        slot.set_state(SubChunkState::Unloaded);
        self.free.lock().push(index);
    }

    /// Appends one face (six vertices) to a claimed slot. Returns false
    /// when the bucket is full.
    pub fn push_face(&self, index: u32, face: &[Vertex; 6]) -> bool {
        let slot = &self.slots[index as usize];
        debug_assert_eq!(slot.state(), SubChunkState::TesselatingVertices);
        let used = slot.verts_used.load(Ordering::Relaxed);
        if used + 6 > self.max_verts_per_sub_chunk {
            return false;
        }
        self.arena.write(slot.first as usize + used as usize, face);
        // Publish the vertices before the renderer can see the new count.
        slot.verts_used.store(used + 6, Ordering::Release);
        true
    }

    /// Flags every uploaded slot of a chunk for rebuild; the mesher retires
    /// them once replacement slots are written.
    pub fn mark_chunk_for_retesselation(&self, coords: ChunkCoord) -> bool {
        let mut any = false;
        for slot in self.slots.iter() {
            if slot.coords() == coords
                && slot.transition(SubChunkState::Uploaded, SubChunkState::RetesselateVertices)
            {
                any = true;
            }
        }
        any
    }

    /// Frees every slot a chunk holds in `Uploaded` state (chunk unload).
    pub fn free_chunk_slots(&self, coords: ChunkCoord) {
        for (index, slot) in self.slots.iter().enumerate() {
            if slot.coords() == coords && slot.state() == SubChunkState::Uploaded {
                self.release(index as u32);
            }
        }
    }

    /// After a chunk's tesselation pass: fresh buckets go to the GPU,
    /// superseded buckets retire next frame.
    pub fn finish_tesselation(&self, coords: ChunkCoord) {
        for slot in self.slots.iter() {
            if slot.coords() != coords {
                continue;
            }
            match slot.state() {
                SubChunkState::TesselatingVertices => {
                    if slot.verts_used() > 0 {
                        slot.set_state(SubChunkState::UploadVerticesToGpu);
                    }
                }
                SubChunkState::RetesselateVertices => {
                    slot.set_state(SubChunkState::DoneRetesselating);
                }
                _ => {}
            }
        }
        // Claimed-but-empty buckets go straight back.
        for (index, slot) in self.slots.iter().enumerate() {
            if slot.coords() == coords
                && slot.state() == SubChunkState::TesselatingVertices
                && slot.verts_used() == 0
            {
                self.release(index as u32);
            }
        }
    }

    /// Read back a slot's vertices (host arenas; tests and tools).
    pub fn slot_vertices(&self, index: u32) -> &[Vertex] {
        let slot = &self.slots[index as usize];
        self.arena
            .read(slot.first as usize, slot.verts_used() as usize)
    }

    pub fn warn_exhausted(&self, coords: ChunkCoord, level: u8) {
        warn!(
            "sub-chunk pool exhausted; dropping geometry for chunk {} level {}",
            coords, level
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::vertex::{Face, UvIndex};
    use glam::IVec3;

    fn test_face(tag: u8) -> [Vertex; 6] {
        let vertex = Vertex::compress(
            IVec3::new(1, 2, 3),
            tag as u16,
            Face::Top,
            UvIndex::TopRight,
            false,
            tag,
            (7, 7, 7),
            0,
        );
        [vertex; 6]
    }

    #[test]
    fn acquire_claims_and_release_recycles() {
        let pool = SubChunkPool::host(2, 60);
        let coords = ChunkCoord::new(3, -4);

        let a = pool.acquire(coords, 5, false).unwrap();
        let b = pool.acquire(coords, 5, true).unwrap();
        assert!(pool.acquire(coords, 5, false).is_none());
        assert_eq!(pool.free_count(), 0);

        assert_eq!(pool.slot(a).state(), SubChunkState::TesselatingVertices);
        assert_eq!(pool.slot(a).coords(), coords);
        assert!(pool.slot(b).is_blendable());

        pool.release(a);
        pool.release(b);
        assert_eq!(pool.free_count(), 2);
        assert_eq!(pool.slot(a).state(), SubChunkState::Unloaded);
    }

    #[test]
    fn push_face_fills_up_to_capacity() {
        let pool = SubChunkPool::host(1, 12);
        let slot = pool.acquire(ChunkCoord::new(0, 0), 0, false).unwrap();

        assert!(pool.push_face(slot, &test_face(1)));
        assert!(pool.push_face(slot, &test_face(2)));
        assert!(!pool.push_face(slot, &test_face(3)), "bucket should be full");

        assert_eq!(pool.slot(slot).verts_used(), 12);
        let verts = pool.slot_vertices(slot);
        assert_eq!(verts.len(), 12);
        assert_eq!(verts[0].texture_id(), 1);
        assert_eq!(verts[6].texture_id(), 2);
    }

    #[test]
    fn slots_write_disjoint_arena_ranges() {
        let pool = SubChunkPool::host(2, 12);
        let a = pool.acquire(ChunkCoord::new(0, 0), 0, false).unwrap();
        let b = pool.acquire(ChunkCoord::new(0, 0), 1, false).unwrap();
        pool.push_face(a, &test_face(10));
        pool.push_face(b, &test_face(20));

        assert_eq!(pool.slot_vertices(a)[0].texture_id(), 10);
        assert_eq!(pool.slot_vertices(b)[0].texture_id(), 20);
        assert_eq!(pool.slot(b).first(), 12);
    }

    #[test]
    fn retesselation_state_machine() {
        let pool = SubChunkPool::host(4, 60);
        let coords = ChunkCoord::new(1, 1);
        let slot = pool.acquire(coords, 2, false).unwrap();
        pool.push_face(slot, &test_face(1));
        pool.finish_tesselation(coords);
        assert_eq!(pool.slot(slot).state(), SubChunkState::UploadVerticesToGpu);

        // Renderer uploads it.
        assert!(pool
            .slot(slot)
            .transition(SubChunkState::UploadVerticesToGpu, SubChunkState::Uploaded));

        // A block changed; the chunk gets flagged, the mesher rebuilds into
        // a fresh slot and the old one retires.
        assert!(pool.mark_chunk_for_retesselation(coords));
        let fresh = pool.acquire(coords, 2, false).unwrap();
        pool.push_face(fresh, &test_face(2));
        pool.finish_tesselation(coords);
        assert_eq!(pool.slot(slot).state(), SubChunkState::DoneRetesselating);
        assert_eq!(pool.slot(fresh).state(), SubChunkState::UploadVerticesToGpu);
    }

    #[test]
    fn empty_buckets_return_to_the_free_list() {
        let pool = SubChunkPool::host(2, 60);
        let coords = ChunkCoord::new(0, 0);
        let slot = pool.acquire(coords, 0, false).unwrap();
        assert_eq!(pool.free_count(), 1);
        pool.finish_tesselation(coords);
        assert_eq!(pool.slot(slot).state(), SubChunkState::Unloaded);
        assert_eq!(pool.free_count(), 2);
    }

    #[test]
    fn free_chunk_slots_only_touches_that_chunk() {
        let pool = SubChunkPool::host(4, 60);
        let here = ChunkCoord::new(0, 0);
        let there = ChunkCoord::new(1, 0);
        let a = pool.acquire(here, 0, false).unwrap();
        let b = pool.acquire(there, 0, false).unwrap();
        pool.push_face(a, &test_face(1));
        pool.push_face(b, &test_face(2));
        pool.finish_tesselation(here);
        pool.finish_tesselation(there);
        pool.slot(a).set_state(SubChunkState::Uploaded);
        pool.slot(b).set_state(SubChunkState::Uploaded);

        pool.free_chunk_slots(here);
        assert_eq!(pool.slot(a).state(), SubChunkState::Unloaded);
        assert_eq!(pool.slot(b).state(), SubChunkState::Uploaded);
    }
}
