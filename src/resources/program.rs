//! Shader programs backed by a source file, with hot reload

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::error::EngineResult;
use crate::shader::{self, ShaderError};

/// A program compiled from one named section of a GLSL file
#[derive(Debug)]
pub struct Program {
    /// Device program, `None` when the last compile failed
    pub handle: Option<ProgramHandle>,
    pub path: PathBuf,
    pub name: String,
    pub last_modified: Option<SystemTime>,
    pub interface: ProgramInterface,
    /// Incremented every time the program is recompiled
    pub generation: u32,
}

impl Program {
    /// Load and compile `name` from the file at `path`.
    ///
    /// Failures are logged and leave the program invalid.
    pub fn load<D: RenderDevice>(device: &mut D, path: impl AsRef<Path>, name: &str) -> Self {
        let path = path.as_ref().to_path_buf();
        let mut program = Self {
            handle: None,
            last_modified: modified_time(&path),
            path,
            name: name.to_string(),
            interface: ProgramInterface::default(),
            generation: 0,
        };

        match program.compile(device) {
            Ok(()) => log::info!("Loaded program {} from {}", program.name, program.path.display()),
            Err(e) => log::error!("Failed to load program {}: {}", program.name, e),
        }
        program
    }

    #[cfg(test)]
    pub(crate) fn detached(name: &str) -> Self {
        Self {
            handle: None,
            path: PathBuf::new(),
            name: name.to_string(),
            last_modified: None,
            interface: ProgramInterface::default(),
            generation: 0,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.handle.is_some()
    }

    fn compile<D: RenderDevice>(&mut self, device: &mut D) -> EngineResult<()> {
        let source = std::fs::read_to_string(&self.path).map_err(|source| ShaderError::Io {
            path: self.path.clone(),
            source,
        })?;
        let compiled = shader::compile_program(&source, &self.name)?;
        let handle = device.create_program(&ProgramDescriptor {
            label: &self.name,
            vertex_source: &compiled.vertex_wgsl,
            fragment_source: &compiled.fragment_wgsl,
            interface: &compiled.interface,
        })?;

        self.interface = compiled.interface;
        self.handle = Some(handle);
        Ok(())
    }

    /// Recompile if the source file changed on disk since the last compile.
    ///
    /// Returns `true` when a recompile was attempted, whether or not it
    /// succeeded. The generation is bumped either way.
    pub fn reload_if_changed<D: RenderDevice>(&mut self, device: &mut D) -> bool {
        let modified = match std::fs::metadata(&self.path).and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(e) => {
                log::warn!(
                    "Cannot check program {} source {}: {}",
                    self.name,
                    self.path.display(),
                    e
                );
                return false;
            }
        };

        if self.last_modified.is_some_and(|last| modified <= last) {
            return false;
        }

        log::info!("Reloading program {} from {}", self.name, self.path.display());
        self.last_modified = Some(modified);
        self.destroy(device);
        self.generation = self.generation.wrapping_add(1);

        if let Err(e) = self.compile(device) {
            log::error!("Failed to reload program {}: {}", self.name, e);
        }
        true
    }

    pub fn destroy<D: RenderDevice>(&mut self, device: &mut D) {
        if let Some(handle) = self.handle.take() {
            device.destroy_program(handle);
        }
    }
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyDevice;
    use std::time::Duration;

    const SOURCE: &str = r#"
#ifdef FLAT
#ifdef VERTEX
layout(location = 0) in vec3 aPosition;
void main() {
    gl_Position = vec4(aPosition, 1.0);
}
#endif
#ifdef FRAGMENT
layout(location = 0) out vec4 oColor;
void main() {
    oColor = vec4(1.0);
}
#endif
#endif
"#;

    fn scratch_file(name: &str, contents: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("renderlab_program_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn touch(path: &Path, ahead: Duration) {
        let file = std::fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() + ahead).unwrap();
    }

    #[test]
    fn test_load_valid_program() {
        let mut device = DummyDevice::new();
        let path = scratch_file("valid.glsl", SOURCE);

        let program = Program::load(&mut device, &path, "FLAT");
        assert!(program.is_valid());
        assert_eq!(program.interface.attributes.len(), 1);
        assert_eq!(program.generation, 0);
        assert!(program.last_modified.is_some());
    }

    #[test]
    fn test_missing_file_leaves_invalid_program() {
        let mut device = DummyDevice::new();
        let program = Program::load(&mut device, "/nonexistent/renderlab.glsl", "FLAT");
        assert!(!program.is_valid());
        assert_eq!(device.live_programs(), 0);
    }

    #[test]
    fn test_unchanged_file_is_not_reloaded() {
        let mut device = DummyDevice::new();
        let path = scratch_file("unchanged.glsl", SOURCE);
        let mut program = Program::load(&mut device, &path, "FLAT");

        assert!(!program.reload_if_changed(&mut device));
        assert_eq!(program.generation, 0);
    }

    #[test]
    fn test_reload_with_broken_fragment() {
        let mut device = DummyDevice::new();
        let path = scratch_file("broken.glsl", SOURCE);
        let mut program = Program::load(&mut device, &path, "FLAT");
        let old_handle = program.handle.unwrap();

        std::fs::write(&path, SOURCE.replace("vec4(1.0);", "vec4(1.0)")).unwrap();
        touch(&path, Duration::from_secs(10));

        assert!(program.reload_if_changed(&mut device));
        assert!(!program.is_valid());
        assert_eq!(program.generation, 1);
        assert!(!device.is_program_alive(old_handle));

        // Fixing the file brings the program back
        std::fs::write(&path, SOURCE).unwrap();
        touch(&path, Duration::from_secs(20));
        assert!(program.reload_if_changed(&mut device));
        assert!(program.is_valid());
        assert_eq!(program.generation, 2);
    }
}
