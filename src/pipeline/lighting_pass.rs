//! Deferred lighting pass
//!
//! Samples the G-buffer and accumulates every light in a single fullscreen
//! draw, with additive blending into the final target.

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::resources::{MeshId, ProgramId};

use super::{PassContext, RenderPass, RenderTargets, GLOBAL_SLOT};

/// First texture unit of the G-buffer attachments
pub const GBUFFER_FIRST_UNIT: u32 = 1;

/// Lighting pass of the deferred pipeline
#[derive(Debug, Clone)]
pub struct LightingPass {
    pub program: ProgramId,
    pub quad: MeshId,
}

impl LightingPass {
    pub fn render_state() -> RenderState {
        RenderState {
            depth_test: false,
            depth_write: false,
            blend: Some(BlendState::additive()),
            ..Default::default()
        }
    }
}

impl RenderPass for LightingPass {
    fn name(&self) -> &str {
        "Lighting Pass"
    }

    fn execute<D: RenderDevice>(&self, ctx: &mut PassContext<'_, D>) -> BackendResult<()> {
        ctx.device
            .begin_pass(ctx.targets.lit.target, &ClearValues::color([0.0, 0.0, 0.0, 1.0]))?;
        ctx.device.set_render_state(&Self::render_state());

        if ctx.use_program(self.program, self.name()).is_some() {
            let gbuffer = [
                RenderTargets::GBUFFER_POSITION,
                RenderTargets::GBUFFER_NORMALS,
                RenderTargets::GBUFFER_DIFFUSE,
            ];
            for (unit, attachment) in (GBUFFER_FIRST_UNIT..).zip(gbuffer) {
                let texture = ctx.targets.gbuffer.color[attachment];
                ctx.device.bind_texture(unit, texture);
            }

            let global = ctx.params.global;
            if ctx.bind_range(GLOBAL_SLOT, global) {
                ctx.draw_mesh(self.quad, self.program);
            }
        }

        ctx.device.end_pass()
    }
}
