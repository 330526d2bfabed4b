//! Render pipeline
//!
//! Three render modes are supported, each a fixed sequence of passes:
//! - `TexturedQuad`: a single textured quad into the forward target
//! - `TexturedMesh`: forward shading of every entity
//! - `Deferred`:
//!   1. G-buffer pass: position, normals and diffuse plus depth
//!   2. Skybox pass: drawn behind the geometry, loading the G-buffer
//!   3. Lighting pass: one fullscreen quad evaluating every light
//!   4. Depth blit from the G-buffer into the final target

pub mod forward_pass;
pub mod gbuffer_pass;
pub mod lighting_pass;
pub mod quad_pass;
pub mod skybox_pass;
pub mod targets;

pub use forward_pass::ForwardPass;
pub use gbuffer_pass::GBufferPass;
pub use lighting_pass::LightingPass;
pub use quad_pass::TexturedQuadPass;
pub use skybox_pass::SkyboxPass;
pub use targets::{RenderTargets, TargetSet};

use crate::backend::traits::*;
use crate::frame::UniformRange;
use crate::resources::{MeshId, ProgramId, ResourceTable};
use crate::scene::Scene;

/// Uniform slot of the global block
pub const GLOBAL_SLOT: u32 = 0;
/// Uniform slot of the per-entity block
pub const LOCAL_SLOT: u32 = 1;
/// Uniform slot of the material block
pub const MATERIAL_SLOT: u32 = 2;

/// Selected render mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RenderMode {
    TexturedQuad,
    TexturedMesh,
    #[default]
    Deferred,
}

impl RenderMode {
    pub const ALL: [RenderMode; 3] = [
        RenderMode::TexturedQuad,
        RenderMode::TexturedMesh,
        RenderMode::Deferred,
    ];
}

/// Which deferred attachment is presented
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DisplayAttachment {
    Position,
    Normals,
    Diffuse,
    Depth,
    #[default]
    Final,
}

/// Uniform ranges written by this frame's update
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameParams {
    pub global: Option<UniformRange>,
    pub skybox: Option<UniformRange>,
}

/// Everything a pass needs to record its commands
pub struct PassContext<'a, D: RenderDevice> {
    pub device: &'a mut D,
    pub resources: &'a mut ResourceTable,
    pub scene: &'a Scene,
    pub targets: &'a RenderTargets,
    /// Device buffer holding this frame's uniform data
    pub uniform_buffer: Option<BufferHandle>,
    pub params: FrameParams,
    pub clear_color: [f32; 4],
}

impl<'a, D: RenderDevice> PassContext<'a, D> {
    /// Bind `range` of the frame buffer to `slot`. Returns `false` when there
    /// is nothing to bind.
    pub fn bind_range(&mut self, slot: u32, range: Option<UniformRange>) -> bool {
        match (self.uniform_buffer, range) {
            (Some(buffer), Some(range)) => {
                self.device.bind_uniform_range(slot, buffer, range.offset, range.size);
                true
            }
            _ => false,
        }
    }

    /// Set `program` if it compiled, otherwise warn and return `None`.
    pub fn use_program(&mut self, program: ProgramId, pass: &str) -> Option<ProgramHandle> {
        let handle = self.resources.program(program).and_then(|p| p.handle);
        match handle {
            Some(handle) => {
                self.device.set_program(handle);
                Some(handle)
            }
            None => {
                log::warn!("{}: program {:?} is invalid, skipping draws", pass, program);
                None
            }
        }
    }

    /// Draw every entity that has uniform blocks this frame with `program`.
    ///
    /// Binds the local block at slot 1 per entity, and per part the material
    /// block at slot 2 and the albedo texture (or white) at unit 0.
    pub fn draw_entities(&mut self, program: ProgramId) -> u32 {
        let mut draws = 0;
        let scene = self.scene;

        for entity in &scene.entities {
            let Some(local) = entity.local_params else {
                continue;
            };
            let Some(mesh) = self.resources.model(entity.model).map(|m| m.mesh) else {
                continue;
            };
            let part_count = self.resources.mesh(mesh).map_or(0, |m| m.submeshes.len());

            self.bind_range(LOCAL_SLOT, Some(local));

            for part in 0..part_count {
                let Some(binding) = self.resources.resolve_binding(self.device, mesh, part, program) else {
                    continue;
                };
                let Some(material_range) = entity.material_params.get(part).copied() else {
                    continue;
                };
                self.device.set_vertex_binding(binding);
                self.bind_range(MATERIAL_SLOT, Some(material_range));

                let texture = self
                    .resources
                    .model(entity.model)
                    .and_then(|m| m.material(part))
                    .and_then(|id| self.resources.material(id))
                    .and_then(|m| m.texture());
                let texture = self.resources.texture_or_white(texture);
                self.device.bind_texture(0, texture);

                if let Some(submesh) = self.resources.mesh(mesh).and_then(|m| m.submeshes.get(part)) {
                    submesh.draw(self.device);
                    draws += 1;
                }
            }
        }
        draws
    }

    /// Draw part 0 of a built-in mesh with `program`.
    pub fn draw_mesh(&mut self, mesh: MeshId, program: ProgramId) -> bool {
        let Some(binding) = self.resources.resolve_binding(self.device, mesh, 0, program) else {
            return false;
        };
        self.device.set_vertex_binding(binding);
        match self.resources.mesh(mesh).and_then(|m| m.submeshes.first()) {
            Some(submesh) => {
                submesh.draw(self.device);
                true
            }
            None => false,
        }
    }
}

/// A pass recording commands into the device
pub trait RenderPass {
    fn name(&self) -> &str;

    fn execute<D: RenderDevice>(&self, ctx: &mut PassContext<'_, D>) -> BackendResult<()>;
}

/// Runs the pass sequence of the selected render mode
#[derive(Debug, Clone)]
pub struct PassScheduler {
    pub quad: TexturedQuadPass,
    pub forward: ForwardPass,
    pub gbuffer: GBufferPass,
    pub skybox: SkyboxPass,
    pub lighting: LightingPass,
}

impl PassScheduler {
    /// Record and submit one frame in `mode`.
    pub fn run<D: RenderDevice>(&self, mode: RenderMode, ctx: &mut PassContext<'_, D>) -> BackendResult<()> {
        match mode {
            RenderMode::TexturedQuad => self.quad.execute(ctx)?,
            RenderMode::TexturedMesh => self.forward.execute(ctx)?,
            RenderMode::Deferred => {
                self.gbuffer.execute(ctx)?;
                self.skybox.execute(ctx)?;
                self.lighting.execute(ctx)?;
                ctx.device.blit_depth(ctx.targets.gbuffer.target, ctx.targets.lit.target)?;
            }
        }
        ctx.device.submit()
    }
}
