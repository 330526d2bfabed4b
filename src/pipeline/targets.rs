//! Offscreen render targets

use crate::backend::traits::*;
use crate::backend::types::*;

use super::DisplayAttachment;

/// A render target and the textures attached to it
#[derive(Debug, Clone)]
pub struct TargetSet {
    pub target: RenderTargetHandle,
    pub color: Vec<TextureHandle>,
    pub depth: Option<TextureHandle>,
}

impl TargetSet {
    fn create<D: RenderDevice>(
        device: &mut D,
        label: &str,
        width: u32,
        height: u32,
        color_formats: &[(&str, TextureFormat)],
        with_depth: bool,
    ) -> BackendResult<Self> {
        let mut color = Vec::with_capacity(color_formats.len());
        for (name, format) in color_formats {
            color.push(device.create_texture(&TextureDescriptor::attachment(
                &format!("{label}_{name}"),
                width,
                height,
                *format,
            ))?);
        }

        let depth = if with_depth {
            Some(device.create_texture(&TextureDescriptor::attachment(
                &format!("{label}_depth"),
                width,
                height,
                TextureFormat::Depth32Float,
            ))?)
        } else {
            None
        };

        let target = device.create_render_target(&RenderTargetDescriptor {
            label: Some(label.to_string()),
            color_attachments: color.clone(),
            depth_attachment: depth,
        })?;

        Ok(Self {
            target,
            color,
            depth,
        })
    }

    fn destroy<D: RenderDevice>(&self, device: &mut D) {
        device.destroy_render_target(self.target);
        for texture in self.color.iter().chain(self.depth.iter()) {
            device.destroy_texture(*texture);
        }
    }
}

/// Every target the passes render into
#[derive(Debug, Clone)]
pub struct RenderTargets {
    pub width: u32,
    pub height: u32,
    /// RGBA16F color and depth, used by the forward modes
    pub forward: TargetSet,
    /// Position, normals, diffuse and depth
    pub gbuffer: TargetSet,
    /// Lit RGBA8 color and the depth copied from the G-buffer
    pub lit: TargetSet,
}

impl RenderTargets {
    pub const GBUFFER_POSITION: usize = 0;
    pub const GBUFFER_NORMALS: usize = 1;
    pub const GBUFFER_DIFFUSE: usize = 2;

    pub fn new<D: RenderDevice>(device: &mut D, width: u32, height: u32) -> BackendResult<Self> {
        let width = width.max(1);
        let height = height.max(1);

        let forward = TargetSet::create(
            device,
            "forward",
            width,
            height,
            &[("color", TextureFormat::Rgba16Float)],
            true,
        )?;
        let gbuffer = TargetSet::create(
            device,
            "gbuffer",
            width,
            height,
            &[
                ("position", TextureFormat::Rgba16Float),
                ("normals", TextureFormat::Rgba16Float),
                ("diffuse", TextureFormat::Rgba8Unorm),
            ],
            true,
        )?;
        let lit = TargetSet::create(
            device,
            "final",
            width,
            height,
            &[("color", TextureFormat::Rgba8Unorm)],
            true,
        )?;

        log::info!("Created render targets ({}x{})", width, height);

        Ok(Self {
            width,
            height,
            forward,
            gbuffer,
            lit,
        })
    }

    /// Log every incomplete target. Returns the number of complete targets.
    pub fn check_status<D: RenderDevice>(&self, device: &D) -> usize {
        let mut complete = 0;
        for (name, set) in [("forward", &self.forward), ("gbuffer", &self.gbuffer), ("final", &self.lit)] {
            let status = device.render_target_status(set.target);
            if status.is_complete() {
                complete += 1;
            } else {
                log::error!("Render target {} is incomplete: {}", name, status);
            }
        }
        complete
    }

    /// Texture behind a deferred display attachment
    pub fn deferred_attachment(&self, attachment: DisplayAttachment) -> TextureHandle {
        match attachment {
            DisplayAttachment::Position => self.gbuffer.color[Self::GBUFFER_POSITION],
            DisplayAttachment::Normals => self.gbuffer.color[Self::GBUFFER_NORMALS],
            DisplayAttachment::Diffuse => self.gbuffer.color[Self::GBUFFER_DIFFUSE],
            DisplayAttachment::Depth => self.gbuffer.depth.unwrap_or(self.lit.color[0]),
            DisplayAttachment::Final => self.lit.color[0],
        }
    }

    pub fn destroy<D: RenderDevice>(&self, device: &mut D) {
        self.forward.destroy(device);
        self.gbuffer.destroy(device);
        self.lit.destroy(device);
    }
}
