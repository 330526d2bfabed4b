//! Textured quad pass

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::resources::{MeshId, ProgramId, TextureId};

use super::{PassContext, RenderPass};

/// Draws one textured quad into the forward target
#[derive(Debug, Clone)]
pub struct TexturedQuadPass {
    pub program: ProgramId,
    pub quad: MeshId,
    /// Falls back to white when `None`
    pub texture: Option<TextureId>,
}

impl RenderPass for TexturedQuadPass {
    fn name(&self) -> &str {
        "Textured Quad Pass"
    }

    fn execute<D: RenderDevice>(&self, ctx: &mut PassContext<'_, D>) -> BackendResult<()> {
        ctx.device
            .begin_pass(ctx.targets.forward.target, &ClearValues::color_and_depth(ctx.clear_color))?;
        ctx.device.set_render_state(&RenderState::opaque_blended());

        if ctx.use_program(self.program, self.name()).is_some() {
            let texture = ctx.resources.texture_or_white(self.texture);
            ctx.device.bind_texture(0, texture);
            ctx.draw_mesh(self.quad, self.program);
        }

        ctx.device.end_pass()
    }
}
