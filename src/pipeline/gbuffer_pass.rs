//! G-Buffer pass for deferred rendering
//!
//! Renders scene geometry to multiple render targets:
//! - Position: world-space position (RGBA16F)
//! - Normals: world-space normal (RGBA16F)
//! - Diffuse: albedo color (RGBA8)
//! - Depth

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::resources::ProgramId;

use super::{PassContext, RenderPass, GLOBAL_SLOT};

/// Geometry pass of the deferred pipeline
#[derive(Debug, Clone)]
pub struct GBufferPass {
    pub program: ProgramId,
}

impl GBufferPass {
    pub fn new(program: ProgramId) -> Self {
        Self { program }
    }
}

impl RenderPass for GBufferPass {
    fn name(&self) -> &str {
        "G-Buffer Pass"
    }

    fn execute<D: RenderDevice>(&self, ctx: &mut PassContext<'_, D>) -> BackendResult<()> {
        ctx.device
            .begin_pass(ctx.targets.gbuffer.target, &ClearValues::color_and_depth([0.0, 0.0, 0.0, 1.0]))?;
        ctx.device.set_render_state(&RenderState::opaque_blended());

        if ctx.use_program(self.program, self.name()).is_some() {
            let global = ctx.params.global;
            ctx.bind_range(GLOBAL_SLOT, global);
            ctx.draw_entities(self.program);
        }

        ctx.device.end_pass()
    }
}
