//! Main engine orchestrator

use std::path::Path;

use glam::Mat4;

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::error::EngineResult;
use crate::frame::{FrameBuffer, FrameResult, UniformRange};
use crate::pipeline::{
    DisplayAttachment, ForwardPass, FrameParams, GBufferPass, LightingPass, PassContext,
    PassScheduler, RenderMode, RenderTargets, SkyboxPass, TexturedQuadPass, GLOBAL_SLOT,
};
use crate::resources::{Material, MeshData, ModelId, ProgramId, ResourceTable, TextureId};
use crate::scene::{Camera, Entity, Light, Scene};
use crate::EngineConfig;

/// Shader file holding the mesh, quad and deferred programs
pub const SHADERS_FILE: &str = "shaders/shaders.glsl";
/// Shader file holding the skybox program
pub const SKYBOX_SHADER_FILE: &str = "shaders/skybox.glsl";
/// Texture shown by the textured quad mode
pub const QUAD_TEXTURE_FILE: &str = "dice.png";
/// Directory with the six cubemap faces
pub const SKYBOX_DIR: &str = "skybox";

/// Half extent of the skybox cube
const SKYBOX_EXTENT: f32 = 1000.0;

/// The engine: owns the device and every subsystem
pub struct Engine<D: RenderDevice> {
    device: D,
    config: EngineConfig,
    limits: DeviceLimits,
    frame: FrameBuffer,
    resources: ResourceTable,
    targets: RenderTargets,
    scheduler: PassScheduler,
    scene: Scene,
    params: FrameParams,
    sphere: ModelId,
    frame_index: u64,
}

impl<D: RenderDevice> Engine<D> {
    /// Create the engine on `device`.
    ///
    /// Shader and texture failures are logged and leave invalid programs or
    /// white fallbacks; only device failures are returned.
    pub fn new(mut device: D, mut config: EngineConfig) -> EngineResult<Self> {
        log::info!("Initializing engine on {} device", device.name());

        let limits = device.limits();
        let capacity = config
            .frame_buffer_capacity
            .unwrap_or(limits.max_uniform_block_size);
        log::info!(
            "Uniform offset alignment {}, frame buffer capacity {} bytes",
            limits.uniform_offset_alignment,
            capacity
        );

        let frame = FrameBuffer::create(&mut device, capacity)?;
        let mut resources = ResourceTable::new(&mut device)?;

        let targets = RenderTargets::new(&mut device, config.width, config.height)?;
        targets.check_status(&device);

        let root = config.asset_root.clone();
        let shaders = root.join(SHADERS_FILE);
        let textured_geometry = resources.load_program(&mut device, &shaders, "TEXTURED_GEOMETRY");
        let textured_mesh = resources.load_program(&mut device, &shaders, "SHOW_TEXTURED_MESH");
        let geometry_pass = resources.load_program(&mut device, &shaders, "DEFERRED_GEOMETRY_PASS");
        let lighting_pass = resources.load_program(&mut device, &shaders, "DEFERRED_LIGHTING_PASS");
        let skybox = resources.load_program(&mut device, root.join(SKYBOX_SHADER_FILE), "SKYBOX");

        if let Some(capacity) = light_capacity(&resources, &[textured_mesh, lighting_pass]) {
            if config.max_lights > capacity {
                log::warn!(
                    "max_lights {} exceeds the {} lights the shaders declare, clamping",
                    config.max_lights,
                    capacity
                );
                config.max_lights = capacity;
            }
        }

        let quad = resources.add_mesh(&mut device, &MeshData::quad())?;
        let cube = resources.add_mesh(&mut device, &MeshData::skybox_cube(SKYBOX_EXTENT))?;
        let sphere = resources.add_mesh_model(
            &mut device,
            &MeshData::sphere(64, 64),
            Material::new("sphere"),
        )?;

        let quad_texture = load_optional(&root.join(QUAD_TEXTURE_FILE), |path| {
            resources.load_texture(&mut device, path)
        });
        let cubemap = load_optional(&root.join(SKYBOX_DIR), |path| {
            resources.load_cubemap(&mut device, path)
        });

        let scheduler = PassScheduler {
            quad: TexturedQuadPass {
                program: textured_geometry,
                quad,
                texture: quad_texture,
            },
            forward: ForwardPass::new(textured_mesh),
            gbuffer: GBufferPass::new(geometry_pass),
            skybox: SkyboxPass {
                program: skybox,
                cube,
                cubemap,
            },
            lighting: LightingPass {
                program: lighting_pass,
                quad,
            },
        };

        let mut scene = Scene::new();
        scene.camera = Camera::new(Camera::default().position, aspect(config.width, config.height));
        scene.add_light(Light::default());
        scene.add_entity(Entity::new(sphere));

        log::info!("Engine initialized ({}x{})", config.width, config.height);

        Ok(Self {
            device,
            config,
            limits,
            frame,
            resources,
            targets,
            scheduler,
            scene,
            params: FrameParams::default(),
            sphere,
            frame_index: 0,
        })
    }

    /// Per-frame update: hot reload, then rewrite the frame's uniform data.
    pub fn update(&mut self) {
        self.resources.reload_changed_programs(&mut self.device);

        let alignment = self.limits.uniform_offset_alignment as u64;
        let mut writer = self.frame.map(&mut self.device);
        self.params = write_frame_params(
            &mut writer,
            &mut self.scene,
            &self.resources,
            alignment,
            self.config.max_lights,
        );
    }

    /// Record and submit the passes of the current render mode.
    pub fn render(&mut self) {
        let mut ctx = PassContext {
            device: &mut self.device,
            resources: &mut self.resources,
            scene: &self.scene,
            targets: &self.targets,
            uniform_buffer: self.frame.device_buffer(),
            params: self.params,
            clear_color: self.config.clear_color,
        };

        if let Err(e) = self.scheduler.run(self.config.render_mode, &mut ctx) {
            log::error!("Frame {} failed: {}", self.frame_index, e);
        }
        self.frame_index += 1;
    }

    /// Update then render one frame.
    pub fn frame(&mut self) {
        self.update();
        self.render();
    }

    // Host API

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn scene_mut(&mut self) -> &mut Scene {
        &mut self.scene
    }

    pub fn entities_mut(&mut self) -> &mut Vec<Entity> {
        &mut self.scene.entities
    }

    pub fn lights_mut(&mut self) -> &mut Vec<Light> {
        &mut self.scene.lights
    }

    pub fn camera_mut(&mut self) -> &mut Camera {
        &mut self.scene.camera
    }

    pub fn render_mode(&self) -> RenderMode {
        self.config.render_mode
    }

    pub fn set_render_mode(&mut self, mode: RenderMode) {
        if mode != self.config.render_mode {
            log::info!("Render mode {:?}", mode);
        }
        self.config.render_mode = mode;
    }

    pub fn display_attachment(&self) -> DisplayAttachment {
        self.config.display_attachment
    }

    pub fn set_display_attachment(&mut self, attachment: DisplayAttachment) {
        self.config.display_attachment = attachment;
    }

    /// Texture the host should present for the current mode
    pub fn displayed_texture(&self) -> TextureHandle {
        match self.config.render_mode {
            RenderMode::TexturedQuad | RenderMode::TexturedMesh => self.targets.forward.color[0],
            RenderMode::Deferred => self
                .targets
                .deferred_attachment(self.config.display_attachment),
        }
    }

    /// Recreate the render targets for a new size.
    pub fn resize(&mut self, width: u32, height: u32) -> EngineResult<()> {
        if width == 0 || height == 0 {
            return Ok(());
        }
        if (width, height) == (self.targets.width, self.targets.height) {
            return Ok(());
        }

        self.targets.destroy(&mut self.device);
        self.targets = RenderTargets::new(&mut self.device, width, height)?;
        self.targets.check_status(&self.device);
        self.config.width = width;
        self.config.height = height;
        self.scene.camera.set_aspect(width, height);
        Ok(())
    }

    /// Load an OBJ model and return its id
    pub fn load_model(&mut self, path: impl AsRef<Path>) -> EngineResult<ModelId> {
        self.resources.load_model(&mut self.device, path)
    }

    /// The built-in sphere model
    pub fn sphere_model(&self) -> ModelId {
        self.sphere
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn limits(&self) -> DeviceLimits {
        self.limits
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn resources(&self) -> &ResourceTable {
        &self.resources
    }

    pub fn resources_mut(&mut self) -> &mut ResourceTable {
        &mut self.resources
    }

    pub fn targets(&self) -> &RenderTargets {
        &self.targets
    }

    pub fn frame_buffer(&self) -> &FrameBuffer {
        &self.frame
    }

    pub fn frame_params(&self) -> FrameParams {
        self.params
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }
}

impl<D: RenderDevice> Drop for Engine<D> {
    fn drop(&mut self) {
        self.resources.destroy(&mut self.device);
        self.targets.destroy(&mut self.device);
        if let Some(buffer) = self.frame.device_buffer() {
            self.device.destroy_buffer(buffer);
        }
    }
}

fn aspect(width: u32, height: u32) -> f32 {
    width.max(1) as f32 / height.max(1) as f32
}

/// Lights the smallest reflected global block of `programs` can hold
fn light_capacity(resources: &ResourceTable, programs: &[ProgramId]) -> Option<usize> {
    programs
        .iter()
        .filter_map(|&id| resources.program(id))
        .flat_map(|program| program.interface.uniform_slots.iter())
        .filter(|block| block.slot == GLOBAL_SLOT)
        .map(|block| Scene::light_capacity(block.min_size))
        .min()
}

fn load_optional(path: &Path, load: impl FnOnce(&Path) -> Option<TextureId>) -> Option<TextureId> {
    if !path.exists() {
        log::warn!("{} not found, using white", path.display());
        return None;
    }
    load(path)
}

/// Write this frame's uniform data: the global block, the skybox block, then
/// the local and material blocks of every entity.
///
/// Running out of space is logged; entities without blocks are not drawn.
pub fn write_frame_params(
    frame: &mut FrameBuffer,
    scene: &mut Scene,
    resources: &ResourceTable,
    alignment: u64,
    max_lights: usize,
) -> FrameParams {
    for entity in &mut scene.entities {
        entity.clear_params();
    }

    let mut params = FrameParams::default();
    match scene.write_global_params(frame, max_lights) {
        Ok(range) => params.global = Some(range),
        Err(e) => {
            log::error!("Failed to write global parameters: {}", e);
            return params;
        }
    }

    let view = scene.camera.view_matrix();
    let projection = scene.camera.projection_matrix();

    match write_skybox_params(frame, projection, view, alignment) {
        Ok(range) => params.skybox = Some(range),
        Err(e) => {
            log::error!("Failed to write skybox parameters: {}", e);
            return params;
        }
    }

    let view_projection = projection * view;
    for (index, entity) in scene.entities.iter_mut().enumerate() {
        if let Err(e) = write_entity_params(frame, entity, resources, view_projection, alignment) {
            entity.clear_params();
            log::error!(
                "Frame buffer full at entity {} of {}: {}",
                index,
                scene.entities.len(),
                e
            );
            break;
        }
    }

    params
}

fn write_skybox_params(
    frame: &mut FrameBuffer,
    projection: Mat4,
    view: Mat4,
    alignment: u64,
) -> FrameResult<UniformRange> {
    let start = frame.align_to(alignment)?;
    frame.push_mat4(projection)?;
    frame.push_mat4(view)?;
    Ok(UniformRange::since(start, frame))
}

fn write_entity_params(
    frame: &mut FrameBuffer,
    entity: &mut Entity,
    resources: &ResourceTable,
    view_projection: Mat4,
    alignment: u64,
) -> FrameResult<()> {
    let world = entity.world_matrix();
    let start = frame.align_to(alignment)?;
    frame.push_mat4(world)?;
    frame.push_mat4(view_projection * world)?;
    let local = UniformRange::since(start, frame);

    let model = resources.model(entity.model);
    let part_count = model
        .and_then(|m| resources.mesh(m.mesh))
        .map_or(0, |mesh| mesh.submeshes.len());

    let mut materials = Vec::with_capacity(part_count);
    for part in 0..part_count {
        let color = model
            .and_then(|m| m.material(part))
            .and_then(|id| resources.material(id))
            .map_or(glam::Vec3::ONE, |m| m.block_color());

        let start = frame.align_to(alignment)?;
        frame.push_vec3(color)?;
        materials.push(UniformRange::since(start, frame));
    }

    entity.local_params = Some(local);
    entity.material_params = materials;
    Ok(())
}
