//! # Headless Demo
//!
//! Renders a few frames in every render mode without a window and reports
//! what happened. With the wgpu backend the displayed texture of each mode
//! can be written to a PNG.
//!
//! ```text
//! cargo run --example headless -- --backend wgpu --frames 3 --output out
//! ```

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use glam::Vec3;
use renderlab::scene::{Entity, Light};
use renderlab::{BackendType, DummyDevice, Engine, EngineConfig, RenderDevice, RenderMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BackendArg {
    Dummy,
    Wgpu,
}

impl From<BackendArg> for BackendType {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Dummy => BackendType::Dummy,
            BackendArg::Wgpu => BackendType::Wgpu,
        }
    }
}

/// Render every mode offscreen
#[derive(Parser, Debug)]
#[command(name = "headless", about = "Render every mode offscreen")]
struct Args {
    /// Device to render with
    #[arg(long, value_enum, default_value = "dummy")]
    backend: BackendArg,

    /// Frames rendered per mode
    #[arg(long, default_value_t = 3)]
    frames: u32,

    #[arg(long, default_value_t = 640)]
    width: u32,

    #[arg(long, default_value_t = 360)]
    height: u32,

    /// Asset directory, defaults to the crate's `assets/`
    #[arg(long)]
    assets: Option<PathBuf>,

    /// OBJ model added to the scene
    #[arg(long)]
    model: Option<PathBuf>,

    /// Directory the displayed textures are written to (wgpu only)
    #[arg(long)]
    output: Option<PathBuf>,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = EngineConfig {
        width: args.width,
        height: args.height,
        backend: args.backend.into(),
        ..Default::default()
    };
    if let Some(assets) = &args.assets {
        config.asset_root = assets.clone();
    }

    let result = match config.backend {
        BackendType::Dummy => run(DummyDevice::new(), config, &args, |_, _| Ok(())),
        BackendType::Wgpu => run_wgpu(config, &args),
    };
    if let Err(e) = result {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

#[cfg(feature = "wgpu-backend")]
fn run_wgpu(config: EngineConfig, args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let device = renderlab::WgpuDevice::new()?;
    let output = args.output.clone();
    run(device, config, args, move |engine, mode| {
        let Some(dir) = &output else {
            return Ok(());
        };
        save_displayed(engine, mode, dir)
    })
}

#[cfg(not(feature = "wgpu-backend"))]
fn run_wgpu(_config: EngineConfig, _args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    Err("built without the wgpu-backend feature".into())
}

#[cfg(feature = "wgpu-backend")]
fn save_displayed(
    engine: &mut Engine<renderlab::WgpuDevice>,
    mode: RenderMode,
    dir: &std::path::Path,
) -> Result<(), Box<dyn std::error::Error>> {
    use renderlab::backend::TextureFormat;

    let texture = engine.displayed_texture();
    let (width, height) = (engine.config().width, engine.config().height);
    let pixels = engine.device_mut().read_texture(texture)?;

    // The forward target is half float; only 8 bit targets are written
    let Some(image) = image::RgbaImage::from_raw(width, height, pixels) else {
        log::warn!("{:?}: displayed texture is not {:?}, not saved", mode, TextureFormat::Rgba8Unorm);
        return Ok(());
    };
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("{:?}.png", mode).to_lowercase());
    image.save(&path)?;
    log::info!("Wrote {}", path.display());
    Ok(())
}

fn run<D: RenderDevice>(
    device: D,
    config: EngineConfig,
    args: &Args,
    mut after_mode: impl FnMut(&mut Engine<D>, RenderMode) -> Result<(), Box<dyn std::error::Error>>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut engine = Engine::new(device, config)?;

    engine.lights_mut().push(Light::point(
        Vec3::new(1.0, 0.5, 0.2),
        Vec3::new(2.0, 2.0, 2.0),
        25.0,
        10.0,
    ));
    let sphere = engine.sphere_model();
    engine.entities_mut()[0].position = Vec3::new(0.0, 10.0, 0.0);
    engine.scene_mut().add_entity(
        Entity::new(sphere)
            .with_position(Vec3::new(3.0, 10.0, -2.0))
            .with_scale(Vec3::splat(0.5)),
    );
    if let Some(path) = &args.model {
        let model = engine.load_model(path)?;
        engine.scene_mut().add_entity(Entity::new(model).with_position(Vec3::new(0.0, 8.0, -5.0)));
    }

    for mode in RenderMode::ALL {
        engine.set_render_mode(mode);
        for _ in 0..args.frames {
            engine.frame();
        }
        log::info!(
            "{:?}: {} frames, {} of {} uniform bytes used",
            mode,
            args.frames,
            engine.frame_buffer().head(),
            engine.frame_buffer().capacity()
        );
        after_mode(&mut engine, mode)?;
    }
    Ok(())
}
