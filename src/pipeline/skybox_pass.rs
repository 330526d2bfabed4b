//! Skybox pass

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::resources::{MeshId, ProgramId, TextureId};

use super::{PassContext, RenderPass, GLOBAL_SLOT};

/// Draws the skybox cube into the G-buffer behind all geometry
#[derive(Debug, Clone)]
pub struct SkyboxPass {
    pub program: ProgramId,
    pub cube: MeshId,
    /// Falls back to the white cubemap when `None`
    pub cubemap: Option<TextureId>,
}

impl SkyboxPass {
    /// Depth-tested with LessEqual, without depth writes
    pub fn render_state() -> RenderState {
        RenderState {
            depth_test: true,
            depth_write: false,
            depth_compare: CompareFunction::LessEqual,
            blend: None,
            cull_mode: CullMode::None,
        }
    }
}

impl RenderPass for SkyboxPass {
    fn name(&self) -> &str {
        "Skybox Pass"
    }

    fn execute<D: RenderDevice>(&self, ctx: &mut PassContext<'_, D>) -> BackendResult<()> {
        // Keep the geometry pass output
        ctx.device
            .begin_pass(ctx.targets.gbuffer.target, &ClearValues::default())?;
        ctx.device.set_render_state(&Self::render_state());

        if ctx.use_program(self.program, self.name()).is_some() {
            let params = ctx.params.skybox;
            if ctx.bind_range(GLOBAL_SLOT, params) {
                let cubemap = ctx.resources.cubemap_or_white(self.cubemap);
                ctx.device.bind_texture(0, cubemap);
                ctx.draw_mesh(self.cube, self.program);
            }
        }

        ctx.device.end_pass()
    }
}
