use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use log::info;

use crate::render::frustum::Frustum;
use crate::render::pool::{SubChunkPool, SubChunkState, VertexArena};
use crate::render::shader::{ShaderError, ShaderProgram};
use crate::render::vertex::Vertex;
use crate::world::chunk::{ChunkState, SUB_CHUNK_HEIGHT};
use crate::world::chunk_coord::ChunkCoord;
use crate::world::chunk_map::ChunkMap;

/// Arguments of one `glMultiDrawArraysIndirect` record.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
pub struct DrawArraysIndirectCommand {
    pub count: u32,
    pub instance_count: u32,
    pub first: u32,
    pub base_instance: u32,
}

/// One queued sub-chunk draw. The sort keys travel in the buffer with the
/// GL arguments; the indirect stride skips over them.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
pub struct DrawCommand {
    pub command: DrawArraysIndirectCommand,
    pub distance: i32,
    pub level: i32,
}

/// CPU side of one render pass: the draw commands plus the two parallel
/// instanced arrays (chunk coordinate and biome id per draw). Buffers are
/// reused frame to frame; the hot path never allocates once warmed up.
pub struct CommandBuffer {
    transparent: bool,
    commands: Vec<DrawCommand>,
    chunk_positions: Vec<i32>,
    biomes: Vec<i32>,
}

impl CommandBuffer {
    pub fn new(capacity: usize, transparent: bool) -> Self {
        Self {
            transparent,
            commands: Vec::with_capacity(capacity),
            chunk_positions: Vec::with_capacity(capacity * 2),
            biomes: Vec::with_capacity(capacity),
        }
    }

    pub fn add(
        &mut self,
        command: DrawArraysIndirectCommand,
        coords: ChunkCoord,
        level: i32,
        player: ChunkCoord,
        biome: i32,
    ) {
        let distance = coords.distance_squared(player) as i32;
        let base_instance = self.commands.len() as u32;
        self.commands.push(DrawCommand {
            command: DrawArraysIndirectCommand {
                base_instance,
                ..command
            },
            distance,
            level,
        });
        self.chunk_positions.push(coords.x);
        self.chunk_positions.push(coords.z);
        self.biomes.push(biome);
    }

    /// Opaque passes sort front-to-back for early-Z; the blendable pass
    /// sorts back-to-front for compositing.
    pub fn sort(&mut self) {
        if self.transparent {
            self.commands.sort_by_key(|cmd| std::cmp::Reverse(cmd.distance));
        } else {
            self.commands.sort_by_key(|cmd| cmd.distance);
        }
        // Re-point the instanced rows at the sorted order.
        let mut positions = std::mem::take(&mut self.chunk_positions);
        let mut biomes = std::mem::take(&mut self.biomes);
        let old_positions = positions.clone();
        let old_biomes = biomes.clone();
        for (index, cmd) in self.commands.iter_mut().enumerate() {
            let source = cmd.command.base_instance as usize;
            positions[index * 2] = old_positions[source * 2];
            positions[index * 2 + 1] = old_positions[source * 2 + 1];
            biomes[index] = old_biomes[source];
            cmd.command.base_instance = index as u32;
        }
        self.chunk_positions = positions;
        self.biomes = biomes;
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn commands(&self) -> &[DrawCommand] {
        &self.commands
    }

    pub fn chunk_positions(&self) -> &[i32] {
        &self.chunk_positions
    }

    pub fn biomes(&self) -> &[i32] {
        &self.biomes
    }

    pub fn clear(&mut self) {
        self.commands.clear();
        self.chunk_positions.clear();
        self.biomes.clear();
    }
}

/// The framebuffer attachments the weighted-OIT composite reads from, and
/// the fullscreen quad it draws with. Owned by the embedder.
pub struct CompositeTargets {
    pub accumulation_texture: u32,
    pub revealage_texture: u32,
    pub quad_vao: u32,
}

/// GL half of the chunk renderer: the global VAO over the persistently
/// mapped vertex buffer, the instanced attribute buffers, the two indirect
/// command buffers and the composite program.
pub struct ChunkRenderer {
    vao: u32,
    vertex_vbo: u32,
    chunk_pos_vbo: u32,
    biome_vbo: u32,
    solid_cmd_vbo: u32,
    blendable_cmd_vbo: u32,
    solid: CommandBuffer,
    blendable: CommandBuffer,
    composite: ShaderProgram,
    chunk_radius: i32,
}

impl ChunkRenderer {
    /// Creates the GL objects and maps the vertex arena the sub-chunk pool
    /// will carve buckets out of. Requires a current GL 4.4+ context.
    pub fn new(
        slot_count: usize,
        max_verts_per_sub_chunk: u32,
        chunk_radius: i32,
        composite_vertex_src: &str,
        composite_fragment_src: &str,
    ) -> Result<(Self, VertexArena), ShaderError> {
        let composite = ShaderProgram::new(composite_vertex_src, composite_fragment_src)?;
        let total_verts = slot_count * max_verts_per_sub_chunk as usize;
        let total_bytes = total_verts * std::mem::size_of::<Vertex>();

        let mut vao = 0;
        let mut vertex_vbo = 0;
        let mut chunk_pos_vbo = 0;
        let mut biome_vbo = 0;
        let mut solid_cmd_vbo = 0;
        let mut blendable_cmd_vbo = 0;

        let arena = unsafe {
            gl::CreateVertexArrays(1, &mut vao);
            gl::BindVertexArray(vao);

            // One immutable, persistently mapped, coherent vertex store.
            gl::GenBuffers(1, &mut vertex_vbo);
            gl::BindBuffer(gl::ARRAY_BUFFER, vertex_vbo);
            let flags = gl::MAP_PERSISTENT_BIT | gl::MAP_WRITE_BIT | gl::MAP_COHERENT_BIT;
            gl::BufferStorage(
                gl::ARRAY_BUFFER,
                total_bytes as isize,
                std::ptr::null(),
                flags,
            );
            let base = gl::MapBufferRange(gl::ARRAY_BUFFER, 0, total_bytes as isize, flags);

            gl::VertexAttribIPointer(
                0,
                1,
                gl::UNSIGNED_INT,
                std::mem::size_of::<Vertex>() as i32,
                std::ptr::null(),
            );
            gl::VertexAttribDivisor(0, 0);
            gl::EnableVertexAttribArray(0);
            gl::VertexAttribIPointer(
                1,
                1,
                gl::UNSIGNED_INT,
                std::mem::size_of::<Vertex>() as i32,
                4 as *const _,
            );
            gl::VertexAttribDivisor(1, 0);
            gl::EnableVertexAttribArray(1);

            // Instanced chunk coordinate (i32 x, i32 z) per draw.
            gl::GenBuffers(1, &mut chunk_pos_vbo);
            gl::BindBuffer(gl::ARRAY_BUFFER, chunk_pos_vbo);
            gl::BufferData(
                gl::ARRAY_BUFFER,
                (std::mem::size_of::<i32>() * 2 * slot_count) as isize,
                std::ptr::null(),
                gl::DYNAMIC_DRAW,
            );
            gl::VertexAttribIPointer(10, 2, gl::INT, 8, std::ptr::null());
            gl::VertexAttribDivisor(10, 1);
            gl::EnableVertexAttribArray(10);

            // Instanced biome id per draw.
            gl::GenBuffers(1, &mut biome_vbo);
            gl::BindBuffer(gl::ARRAY_BUFFER, biome_vbo);
            gl::BufferData(
                gl::ARRAY_BUFFER,
                (std::mem::size_of::<i32>() * slot_count) as isize,
                std::ptr::null(),
                gl::DYNAMIC_DRAW,
            );
            gl::VertexAttribIPointer(11, 1, gl::INT, 4, std::ptr::null());
            gl::VertexAttribDivisor(11, 1);
            gl::EnableVertexAttribArray(11);

            for vbo in [&mut solid_cmd_vbo, &mut blendable_cmd_vbo] {
                gl::GenBuffers(1, vbo);
                gl::BindBuffer(gl::DRAW_INDIRECT_BUFFER, *vbo);
                gl::BufferData(
                    gl::DRAW_INDIRECT_BUFFER,
                    (std::mem::size_of::<DrawCommand>() * slot_count) as isize,
                    std::ptr::null(),
                    gl::DYNAMIC_DRAW,
                );
            }

            VertexArena::mapped(base as *mut Vertex, total_verts)
        };

        info!(
            "sub-chunk vertex pool: {} slots, {:.2} MiB mapped",
            slot_count,
            total_bytes as f64 / (1024.0 * 1024.0)
        );

        Ok((
            Self {
                vao,
                vertex_vbo,
                chunk_pos_vbo,
                biome_vbo,
                solid_cmd_vbo,
                blendable_cmd_vbo,
                solid: CommandBuffer::new(slot_count, false),
                blendable: CommandBuffer::new(slot_count, true),
                composite,
                chunk_radius,
            },
            arena,
        ))
    }

    /// Per-frame pass: walk the slots, retire and upload what changed,
    /// frustum-cull, sort, and issue the two indirect multi-draws plus the
    /// OIT composite.
    #[allow(clippy::too_many_arguments)]
    pub fn render(
        &mut self,
        pool: &SubChunkPool,
        map: &ChunkMap,
        frustum: &Frustum,
        player_pos: Vec3,
        player_chunk: ChunkCoord,
        opaque_shader: &ShaderProgram,
        blendable_shader: &ShaderProgram,
        targets: &CompositeTargets,
        tint: Vec3,
    ) {
        self.build_draw_lists(pool, map, frustum, player_chunk);

        if !self.solid.is_empty() {
            self.solid.sort();
            unsafe {
                gl::Enable(gl::CULL_FACE);
                gl::Enable(gl::DEPTH_TEST);
                gl::DepthFunc(gl::LESS);
                gl::DepthMask(gl::TRUE);
                gl::Disable(gl::BLEND);
            }
            self.upload_pass(self.solid_cmd_vbo, true);
            opaque_shader.bind();
            opaque_shader.set_vec3("uPlayerPosition", player_pos);
            opaque_shader.set_int("uChunkRadius", self.chunk_radius);
            opaque_shader.set_vec3("uTint", tint);
            unsafe {
                gl::BindVertexArray(self.vao);
                gl::MultiDrawArraysIndirect(
                    gl::TRIANGLES,
                    std::ptr::null(),
                    self.solid.len() as i32,
                    std::mem::size_of::<DrawCommand>() as i32,
                );
            }
            self.solid.clear();
        }

        if !self.blendable.is_empty() {
            self.blendable.sort();
            unsafe {
                // Accumulation and revealage attachments only.
                let buffers = [gl::NONE, gl::COLOR_ATTACHMENT1, gl::COLOR_ATTACHMENT2];
                gl::DrawBuffers(3, buffers.as_ptr());
                let zero = [0.0f32; 4];
                gl::ClearBufferfv(gl::COLOR, 1, zero.as_ptr());
                let one = [1.0f32, 0.0, 0.0, 0.0];
                gl::ClearBufferfv(gl::COLOR, 2, one.as_ptr());

                // Depth writes off so the pass cannot occlude the opaque
                // depth values.
                gl::DepthMask(gl::FALSE);
                gl::Enable(gl::BLEND);
                gl::BlendFunci(1, gl::ONE, gl::ONE);
                gl::BlendFunci(2, gl::ZERO, gl::ONE_MINUS_SRC_COLOR);
                gl::BlendEquation(gl::FUNC_ADD);
            }
            self.upload_pass(self.blendable_cmd_vbo, false);
            blendable_shader.bind();
            blendable_shader.set_vec3("uPlayerPosition", player_pos);
            blendable_shader.set_int("uChunkRadius", self.chunk_radius);
            blendable_shader.set_vec3("uTint", tint);
            unsafe {
                gl::BindVertexArray(self.vao);
                gl::MultiDrawArraysIndirect(
                    gl::TRIANGLES,
                    std::ptr::null(),
                    self.blendable.len() as i32,
                    std::mem::size_of::<DrawCommand>() as i32,
                );
            }
            self.blendable.clear();

            unsafe {
                // Composite the two OIT attachments over the opaque target.
                gl::Enable(gl::CULL_FACE);
                gl::DepthMask(gl::TRUE);
                let main_buffers = [gl::COLOR_ATTACHMENT0, gl::NONE, gl::NONE];
                gl::DrawBuffers(3, main_buffers.as_ptr());
                gl::DepthFunc(gl::ALWAYS);
                gl::Enable(gl::BLEND);
                gl::BlendFunc(gl::SRC_ALPHA, gl::ONE_MINUS_SRC_ALPHA);

                self.composite.bind();
                gl::ActiveTexture(gl::TEXTURE0);
                gl::BindTexture(gl::TEXTURE_2D, targets.accumulation_texture);
                self.composite.set_int("accumulationTexture", 0);
                gl::ActiveTexture(gl::TEXTURE1);
                gl::BindTexture(gl::TEXTURE_2D, targets.revealage_texture);
                self.composite.set_int("revealTexture", 1);

                gl::BindVertexArray(targets.quad_vao);
                gl::DrawArrays(gl::TRIANGLES, 0, 6);
                gl::DepthFunc(gl::LESS);
            }
        }
    }

    fn build_draw_lists(
        &mut self,
        pool: &SubChunkPool,
        map: &ChunkMap,
        frustum: &Frustum,
        player_chunk: ChunkCoord,
    ) {
        self.solid.clear();
        self.blendable.clear();
        scan_slots(
            pool,
            map,
            frustum,
            player_chunk,
            &mut self.solid,
            &mut self.blendable,
        );
    }

    fn upload_pass(&self, cmd_vbo: u32, solid: bool) {
        let pass = if solid { &self.solid } else { &self.blendable };
        unsafe {
            gl::BindBuffer(gl::ARRAY_BUFFER, self.chunk_pos_vbo);
            gl::BufferSubData(
                gl::ARRAY_BUFFER,
                0,
                std::mem::size_of_val(pass.chunk_positions()) as isize,
                pass.chunk_positions().as_ptr() as *const _,
            );
            gl::BindBuffer(gl::ARRAY_BUFFER, self.biome_vbo);
            gl::BufferSubData(
                gl::ARRAY_BUFFER,
                0,
                std::mem::size_of_val(pass.biomes()) as isize,
                pass.biomes().as_ptr() as *const _,
            );
            gl::BindBuffer(gl::DRAW_INDIRECT_BUFFER, cmd_vbo);
            gl::BufferSubData(
                gl::DRAW_INDIRECT_BUFFER,
                0,
                (pass.len() * std::mem::size_of::<DrawCommand>()) as isize,
                pass.commands().as_ptr() as *const _,
            );
        }
    }

    pub fn solid_commands(&self) -> &CommandBuffer {
        &self.solid
    }

    pub fn blendable_commands(&self) -> &CommandBuffer {
        &self.blendable
    }
}

/// Steps 1, 2, 3 and 6 of the per-frame procedure: retire orphaned and
/// superseded slots, flip freshly written buckets to `Uploaded`, and append
/// a draw command for every visible live bucket. Pure slot/map work, no GL.
pub fn scan_slots(
    pool: &SubChunkPool,
    map: &ChunkMap,
    frustum: &Frustum,
    player_chunk: ChunkCoord,
    solid: &mut CommandBuffer,
    blendable: &mut CommandBuffer,
) {
    for index in 0..pool.slot_count() as u32 {
        let slot = pool.slot(index);
        let state = slot.state();
        if state == SubChunkState::Unloaded {
            continue;
        }
        let coords = slot.coords();
        match map.get(coords) {
            None => {
                // Chunk vanished; reclaim unless the worker is still
                // writing into the bucket.
                if state != SubChunkState::TesselatingVertices {
                    pool.release(index);
                }
            }
            Some(chunk) if chunk.state() == ChunkState::Loaded => {
                if state == SubChunkState::UploadVerticesToGpu && slot.verts_used() > 0 {
                    slot.set_state(SubChunkState::Uploaded);
                }
                let state = slot.state();
                if state == SubChunkState::Uploaded || state == SubChunkState::RetesselateVertices
                {
                    debug_assert!(slot.verts_used() > 0);
                    let min = Vec3::new(
                        (coords.x * 16) as f32,
                        (slot.level() as usize * SUB_CHUNK_HEIGHT) as f32,
                        (coords.z * 16) as f32,
                    );
                    if frustum.intersects_aabb(min, min + Vec3::splat(16.0)) {
                        let command = DrawArraysIndirectCommand {
                            count: slot.verts_used(),
                            instance_count: 1,
                            first: slot.first(),
                            base_instance: 0,
                        };
                        let target = if slot.is_blendable() { &mut *blendable } else { &mut *solid };
                        target.add(command, coords, slot.level() as i32, player_chunk, 0);
                    }
                }
                if state == SubChunkState::DoneRetesselating {
                    pool.release(index);
                }
            }
            Some(_) => {}
        }
    }
}

impl Drop for ChunkRenderer {
    fn drop(&mut self) {
        unsafe {
            gl::BindBuffer(gl::ARRAY_BUFFER, self.vertex_vbo);
            gl::UnmapBuffer(gl::ARRAY_BUFFER);
            gl::DeleteBuffers(1, &self.vertex_vbo);
            gl::DeleteBuffers(1, &self.chunk_pos_vbo);
            gl::DeleteBuffers(1, &self.biome_vbo);
            gl::DeleteBuffers(1, &self.solid_cmd_vbo);
            gl::DeleteBuffers(1, &self.blendable_cmd_vbo);
            gl::DeleteVertexArrays(1, &self.vao);
        }
    }
}
