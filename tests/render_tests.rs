//! Engine integration tests.
//!
//! Backend-agnostic checks run against every device through rstest cases; an
//! unavailable wgpu adapter skips its case. Command-sequence checks use the
//! recording dummy device only.
//!
//! ```bash
//! cargo test --test render_tests
//! ```

#[macro_use]
mod common;

use glam::Vec3;
use rstest::rstest;

use common::Backend;
use renderlab::backend::{
    BlendState, ClearValues, CompareFunction, DeviceCommand, PrimitiveTopology, RenderDevice,
};
use renderlab::scene::{Entity, Light};
use renderlab::{DisplayAttachment, Engine, EngineConfig, RenderMode};

fn draw_count(commands: &[DeviceCommand]) -> usize {
    commands
        .iter()
        .filter(|c| matches!(c, DeviceCommand::Draw { .. } | DeviceCommand::DrawIndexed { .. }))
        .count()
}

fn program_generation<D: RenderDevice>(engine: &Engine<D>, name: &str) -> (bool, u32) {
    let (_, program) = engine
        .resources()
        .programs()
        .find(|(_, p)| p.name == name)
        .expect("program exists");
    (program.is_valid(), program.generation)
}

// ============================================================================
// Every device
// ============================================================================

fn check_programs_compile<D: RenderDevice>(engine: &mut Engine<D>) {
    assert!(
        common::invalid_programs(engine).is_empty(),
        "invalid programs: {:?}",
        common::invalid_programs(engine)
    );
    assert_eq!(engine.resources().programs().count(), 5);
}

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::wgpu(Backend::Wgpu)]
fn test_shipped_programs_compile(#[case] backend: Backend) {
    with_engine!(backend, common::test_config(), check_programs_compile);
}

fn check_every_mode_renders<D: RenderDevice>(engine: &mut Engine<D>) {
    for mode in RenderMode::ALL {
        engine.set_render_mode(mode);
        engine.frame();
        engine.frame();

        let params = engine.frame_params();
        assert!(params.global.is_some(), "{:?}", mode);
        assert!(params.skybox.is_some(), "{:?}", mode);
        assert!(engine.scene().entities[0].local_params.is_some(), "{:?}", mode);
    }
    assert_eq!(engine.frame_index(), 6);
}

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::wgpu(Backend::Wgpu)]
fn test_every_mode_renders(#[case] backend: Backend) {
    with_engine!(backend, common::test_config(), check_every_mode_renders);
}

fn check_out_of_space<D: RenderDevice>(engine: &mut Engine<D>) {
    let alignment = engine.limits().uniform_offset_alignment as u64;
    let sphere = engine.sphere_model();
    for i in 0..20 {
        engine
            .scene_mut()
            .add_entity(Entity::new(sphere).with_position(Vec3::new(i as f32, 0.0, 0.0)));
    }

    engine.update();

    let entities = &engine.scene().entities;
    let written = entities.iter().take_while(|e| e.local_params.is_some()).count();
    assert!(written > 0 && written < entities.len());
    assert!(entities[written..].iter().all(|e| e.local_params.is_none()));
    assert!(entities[written..].iter().all(|e| e.material_params.is_empty()));
    for entity in &entities[..written] {
        let local = entity.local_params.unwrap();
        assert_eq!(local.offset % alignment, 0);
        assert_eq!(local.size, 128);
        assert_eq!(entity.material_params.len(), 1);
    }
    assert!(engine.frame_buffer().head() <= engine.frame_buffer().capacity());

    // Entities without blocks are skipped, the frame still completes
    engine.set_render_mode(RenderMode::TexturedMesh);
    engine.render();
    assert_eq!(engine.frame_index(), 1);
}

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::wgpu(Backend::Wgpu)]
fn test_frame_buffer_out_of_space(#[case] backend: Backend) {
    let config = EngineConfig {
        frame_buffer_capacity: Some(4096),
        ..common::test_config()
    };
    with_engine!(backend, config, check_out_of_space);
}

fn check_hot_reload<D: RenderDevice>(engine: &mut Engine<D>) {
    let shaders = engine.config().asset_root.join("shaders/shaders.glsl");
    let source = std::fs::read_to_string(&shaders).unwrap();
    engine.frame();

    // Unchanged file: nothing reloads
    engine.update();
    assert_eq!(program_generation(engine, "DEFERRED_GEOMETRY_PASS"), (true, 0));

    common::touch_with(&shaders, &format!("{}\n// edited\n", source), 10);
    engine.update();
    for name in [
        "TEXTURED_GEOMETRY",
        "SHOW_TEXTURED_MESH",
        "DEFERRED_GEOMETRY_PASS",
        "DEFERRED_LIGHTING_PASS",
    ] {
        assert_eq!(program_generation(engine, name), (true, 1), "{}", name);
    }
    assert_eq!(program_generation(engine, "SKYBOX"), (true, 0));

    let broken = source.replace(
        "oPosition = vec4(vWorldPosition, 1.0);",
        "oPosition = vec4(vWorldPosition, 1.0)",
    );
    assert_ne!(broken, source);
    common::touch_with(&shaders, &broken, 20);
    engine.frame();
    assert_eq!(program_generation(engine, "DEFERRED_GEOMETRY_PASS"), (false, 2));
    assert_eq!(program_generation(engine, "DEFERRED_LIGHTING_PASS"), (true, 2));
    assert!(common::logged(
        log::Level::Error,
        "Failed to reload program DEFERRED_GEOMETRY_PASS"
    ));

    common::touch_with(&shaders, &source, 30);
    engine.frame();
    assert_eq!(program_generation(engine, "DEFERRED_GEOMETRY_PASS"), (true, 3));
}

#[rstest]
#[case::dummy(Backend::Dummy, "reload_dummy")]
#[case::wgpu(Backend::Wgpu, "reload_wgpu")]
fn test_hot_reload(#[case] backend: Backend, #[case] scratch: &str) {
    common::capture_logs();
    let config = EngineConfig {
        asset_root: common::scratch_assets(scratch),
        ..common::test_config()
    };
    with_engine!(backend, config, check_hot_reload);
}

// ============================================================================
// Recorded command sequences
// ============================================================================

#[test]
fn test_deferred_pass_sequence() {
    let mut engine = common::dummy_engine(common::test_config());
    let gbuffer = engine.targets().gbuffer.target;
    let lit = engine.targets().lit.target;
    let gbuffer_color = engine.targets().gbuffer.color.clone();

    engine.frame();
    let commands = engine.device_mut().take_commands();

    let passes: Vec<_> = commands
        .iter()
        .filter_map(|c| match c {
            DeviceCommand::BeginPass { target, clear } => Some((*target, *clear)),
            _ => None,
        })
        .collect();
    assert_eq!(passes.len(), 3);
    assert_eq!(passes[0].0, gbuffer);
    assert_eq!(passes[1], (gbuffer, ClearValues::default()));
    assert_eq!(passes[2].0, lit);

    let n = commands.len();
    assert_eq!(commands[n - 2], DeviceCommand::BlitDepth { src: gbuffer, dst: lit });
    assert_eq!(commands[n - 1], DeviceCommand::Submit);

    // Sphere, skybox cube, lighting quad
    assert_eq!(draw_count(&commands), 3);
    assert!(commands.contains(&DeviceCommand::Draw {
        topology: PrimitiveTopology::TriangleList,
        vertex_count: 36,
    }));
    assert!(commands.contains(&DeviceCommand::Draw {
        topology: PrimitiveTopology::TriangleStrip,
        vertex_count: 4,
    }));

    for (unit, texture) in (1..).zip(gbuffer_color) {
        assert!(commands.contains(&DeviceCommand::BindTexture { unit, texture }));
    }

    let states: Vec<_> = commands
        .iter()
        .filter_map(|c| match c {
            DeviceCommand::SetRenderState(state) => Some(*state),
            _ => None,
        })
        .collect();
    assert_eq!(states.len(), 3);
    // Geometry writes depth
    assert!(states[0].depth_test && states[0].depth_write);
    // Skybox sits behind the geometry without touching depth
    assert!(states[1].depth_test);
    assert!(!states[1].depth_write);
    assert_eq!(states[1].depth_compare, CompareFunction::LessEqual);
    // Lights accumulate
    assert_eq!(states[2].blend, Some(BlendState::additive()));
    assert!(!states[2].depth_test);
}

#[test]
fn test_entity_blocks_bound_per_draw() {
    let mut engine = common::dummy_engine(common::test_config());
    engine.set_render_mode(RenderMode::TexturedMesh);
    let sphere = engine.sphere_model();
    engine
        .scene_mut()
        .add_entity(Entity::new(sphere).with_position(Vec3::new(4.0, 0.0, 0.0)));

    engine.frame();
    let commands = engine.device_mut().take_commands();
    let buffer = engine.frame_buffer().device_buffer().unwrap();

    let bound: Vec<(u32, u64)> = commands
        .iter()
        .filter_map(|c| match c {
            DeviceCommand::BindUniformRange { slot, buffer: b, offset, .. } if *b == buffer => {
                Some((*slot, *offset))
            }
            _ => None,
        })
        .collect();

    let entities = &engine.scene().entities;
    let global = engine.frame_params().global.unwrap();
    let expected = vec![
        (0, global.offset),
        (1, entities[0].local_params.unwrap().offset),
        (2, entities[0].material_params[0].offset),
        (1, entities[1].local_params.unwrap().offset),
        (2, entities[1].material_params[0].offset),
    ];
    assert_eq!(bound, expected);
    assert_eq!(draw_count(&commands), 2);
}

#[test]
fn test_textured_quad_falls_back_to_white() {
    let mut engine = common::dummy_engine(EngineConfig {
        render_mode: RenderMode::TexturedQuad,
        asset_root: common::scratch_assets("quad"),
        ..common::test_config()
    });
    let white = engine.resources().white_texture();
    let forward = engine.targets().forward.target;
    let clear = engine.config().clear_color;
    engine.device_mut().take_commands();

    engine.frame();
    let commands = engine.device_mut().take_commands();

    assert_eq!(
        commands[0],
        DeviceCommand::BeginPass {
            target: forward,
            clear: ClearValues::color_and_depth(clear),
        }
    );
    assert!(commands.contains(&DeviceCommand::BindTexture { unit: 0, texture: white }));
    assert_eq!(draw_count(&commands), 1);
    assert_eq!(engine.displayed_texture(), engine.targets().forward.color[0]);
}

#[test]
fn test_bindings_evicted_on_reload() {
    let mut engine = common::dummy_engine(EngineConfig {
        asset_root: common::scratch_assets("evict"),
        ..common::test_config()
    });
    let shaders = engine.config().asset_root.join("shaders/shaders.glsl");

    engine.frame();
    // Geometry on the sphere, skybox on the cube, lighting on the quad
    assert_eq!(engine.device().live_vertex_bindings(), 3);

    let source = std::fs::read_to_string(&shaders).unwrap();
    common::touch_with(&shaders, &source, 10);
    engine.update();
    assert_eq!(engine.device().live_vertex_bindings(), 1);

    engine.render();
    assert_eq!(engine.device().live_vertex_bindings(), 3);
}

#[test]
fn test_invalid_program_skips_draws() {
    common::capture_logs();
    let root = common::scratch_assets("invalid");
    std::fs::write(root.join("shaders/skybox.glsl"), "this is not glsl").unwrap();
    let mut engine = common::dummy_engine(EngineConfig {
        asset_root: root,
        ..common::test_config()
    });
    assert_eq!(common::invalid_programs(&engine), vec!["SKYBOX".to_string()]);
    assert!(common::logged(log::Level::Error, "Failed to load program SKYBOX"));

    engine.frame();
    let commands = engine.device_mut().take_commands();

    // Skybox pass still opens and closes its pass, without drawing
    let begins = commands
        .iter()
        .filter(|c| matches!(c, DeviceCommand::BeginPass { .. }))
        .count();
    assert_eq!(begins, 3);
    assert_eq!(draw_count(&commands), 2);
    assert!(common::logged(log::Level::Warn, "Skybox Pass: program"));
}

#[test]
fn test_max_lights_clamped_to_shader_array() {
    let mut engine = common::dummy_engine(EngineConfig {
        max_lights: 64,
        ..common::test_config()
    });
    assert_eq!(engine.config().max_lights, 16);

    engine.lights_mut().clear();
    for i in 0..20 {
        engine
            .lights_mut()
            .push(Light::point(Vec3::ONE, Vec3::new(i as f32, 0.0, 0.0), 5.0, 1.0));
    }
    engine.update();
    assert_eq!(engine.frame_params().global.unwrap().size, 16 + 16 * 64);

    let engine = common::dummy_engine(EngineConfig {
        max_lights: 4,
        ..common::test_config()
    });
    assert_eq!(engine.config().max_lights, 4);
}

#[test]
fn test_display_attachment_and_resize() {
    let mut engine = common::dummy_engine(common::test_config());
    engine.set_display_attachment(DisplayAttachment::Normals);
    let normals = engine.displayed_texture();
    assert_eq!(normals, engine.targets().gbuffer.color[1]);

    engine.set_display_attachment(DisplayAttachment::Final);
    assert_eq!(engine.displayed_texture(), engine.targets().lit.color[0]);

    engine.resize(32, 16).unwrap();
    assert!(engine.device().texture_descriptor(normals).is_none());
    let resized = engine
        .device()
        .texture_descriptor(engine.displayed_texture())
        .unwrap();
    assert_eq!((resized.width, resized.height), (32, 16));
    assert_eq!(engine.scene().camera.aspect, 2.0);

    engine.frame();
    assert_eq!(engine.frame_index(), 1);
}

#[test]
fn test_loaded_model_is_drawn() {
    let root = common::scratch_assets("model");
    let obj = root.join("triangle.obj");
    std::fs::write(
        &obj,
        "v 0 0 0\nv 1 0 0\nv 0 1 0\nvt 0 0\nvt 1 0\nvt 0 1\nvn 0 0 1\nf 1/1/1 2/2/1 3/3/1\n",
    )
    .unwrap();

    let mut engine = common::dummy_engine(EngineConfig {
        render_mode: RenderMode::TexturedMesh,
        asset_root: root,
        ..common::test_config()
    });
    let model = engine.load_model(&obj).unwrap();
    engine.scene_mut().add_entity(Entity::new(model));

    engine.frame();
    let commands = engine.device_mut().take_commands();
    let indexed: Vec<_> = commands
        .iter()
        .filter_map(|c| match c {
            DeviceCommand::DrawIndexed { index_count, .. } => Some(*index_count),
            _ => None,
        })
        .collect();
    assert_eq!(indexed.len(), 2);
    assert_eq!(indexed[1], 3);
}
