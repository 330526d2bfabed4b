//! Shared setup for the engine integration tests.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, SystemTime};

use renderlab::{DummyDevice, Engine, EngineConfig, RenderDevice};

/// Devices the tests can run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    Dummy,
    Wgpu,
}

/// Small targets keep the wgpu runs cheap.
pub fn test_config() -> EngineConfig {
    EngineConfig {
        width: 64,
        height: 48,
        ..Default::default()
    }
}

pub fn dummy_engine(config: EngineConfig) -> Engine<DummyDevice> {
    Engine::new(DummyDevice::new(), config).expect("dummy engine")
}

/// Run `check` on a wgpu engine, or skip when no adapter is available.
#[cfg(feature = "wgpu-backend")]
pub fn run_wgpu(config: EngineConfig, check: impl FnOnce(&mut Engine<renderlab::WgpuDevice>)) {
    match renderlab::WgpuDevice::new() {
        Ok(device) => check(&mut Engine::new(device, config).expect("wgpu engine")),
        Err(e) => eprintln!("wgpu not available, skipping: {}", e),
    }
}

/// Run `check` against an engine on `backend`, skipping unavailable devices.
///
/// `check` is written once and instantiated per device type.
macro_rules! with_engine {
    ($backend:expr, $config:expr, $check:ident) => {
        match $backend {
            common::Backend::Dummy => {
                $check(&mut common::dummy_engine($config));
            }
            common::Backend::Wgpu => {
                #[cfg(feature = "wgpu-backend")]
                common::run_wgpu($config, |engine| $check(engine));
            }
        }
    };
}

/// Copy the shipped shaders into a fresh directory so tests can edit them.
pub fn scratch_assets(name: &str) -> PathBuf {
    let root = std::env::temp_dir().join(format!("renderlab_{}_{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&root);
    std::fs::create_dir_all(root.join("shaders")).unwrap();

    let shipped = Path::new(env!("CARGO_MANIFEST_DIR")).join("assets/shaders");
    for file in ["shaders.glsl", "skybox.glsl"] {
        std::fs::copy(shipped.join(file), root.join("shaders").join(file)).unwrap();
    }
    root
}

/// Rewrite a file and push its modification time forward.
pub fn touch_with(path: &Path, contents: &str, seconds_ahead: u64) {
    std::fs::write(path, contents).unwrap();
    let file = std::fs::File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() + Duration::from_secs(seconds_ahead))
        .unwrap();
}

/// Name of every program that failed to compile.
pub fn invalid_programs<D: RenderDevice>(engine: &Engine<D>) -> Vec<String> {
    engine
        .resources()
        .programs()
        .filter(|(_, p)| !p.is_valid())
        .map(|(_, p)| p.name.clone())
        .collect()
}

// ============================================================================
// Log capture
// ============================================================================

/// Logger that forwards to `env_logger` and keeps every warning and error.
struct LogCapture {
    inner: env_logger::Logger,
    entries: Mutex<Vec<(log::Level, String)>>,
}

impl log::Log for LogCapture {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::Level::Warn || self.inner.enabled(metadata)
    }

    fn log(&self, record: &log::Record) {
        if self.inner.enabled(record.metadata()) {
            self.inner.log(record);
        }
        if record.level() <= log::Level::Warn {
            if let Ok(mut entries) = self.entries.lock() {
                entries.push((record.level(), format!("{}", record.args())));
            }
        }
    }

    fn flush(&self) {
        self.inner.flush();
    }
}

static LOG_CAPTURE: OnceLock<&'static LogCapture> = OnceLock::new();

/// Install the capturing logger for this test binary. Safe to call from every test.
pub fn capture_logs() {
    LOG_CAPTURE.get_or_init(|| {
        let inner = env_logger::Builder::from_default_env().is_test(true).build();
        let max_level = inner.filter().max(log::LevelFilter::Warn);
        let capture: &'static LogCapture = Box::leak(Box::new(LogCapture {
            inner,
            entries: Mutex::new(Vec::new()),
        }));
        log::set_logger(capture).expect("no other logger installed");
        log::set_max_level(max_level);
        capture
    });
}

/// Whether any test in this binary logged `needle` at `level`.
///
/// Tests run in parallel and share the log, so match on text that names the
/// resource under test.
pub fn logged(level: log::Level, needle: &str) -> bool {
    LOG_CAPTURE
        .get()
        .and_then(|capture| capture.entries.lock().ok())
        .is_some_and(|entries| {
            entries
                .iter()
                .any(|(l, message)| *l == level && message.contains(needle))
        })
}
