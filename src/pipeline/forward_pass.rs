//! Forward textured mesh pass

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::resources::ProgramId;

use super::{PassContext, RenderPass, GLOBAL_SLOT};

/// Shades every entity directly into the forward target
#[derive(Debug, Clone)]
pub struct ForwardPass {
    pub program: ProgramId,
}

impl ForwardPass {
    pub fn new(program: ProgramId) -> Self {
        Self { program }
    }
}

impl RenderPass for ForwardPass {
    fn name(&self) -> &str {
        "Forward Pass"
    }

    fn execute<D: RenderDevice>(&self, ctx: &mut PassContext<'_, D>) -> BackendResult<()> {
        ctx.device
            .begin_pass(ctx.targets.forward.target, &ClearValues::color_and_depth(ctx.clear_color))?;
        ctx.device.set_render_state(&RenderState::opaque_blended());

        if ctx.use_program(self.program, self.name()).is_some() {
            let global = ctx.params.global;
            ctx.bind_range(GLOBAL_SLOT, global);
            let draws = ctx.draw_entities(self.program);
            log::trace!("{}: {} draws", self.name(), draws);
        }

        ctx.device.end_pass()
    }
}
