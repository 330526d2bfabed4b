//! Shader front end.
//!
//! A program lives in a single GLSL file. Each file may hold several programs,
//! selected by a name macro, and each program holds both stages, gated by the
//! `VERTEX` and `FRAGMENT` macros:
//!
//! ```glsl
//! #ifdef SHOW_TEXTURED_MESH
//! #ifdef VERTEX
//! layout(location = 0) in vec3 aPosition;
//! void main() { gl_Position = vec4(aPosition, 1.0); }
//! #endif
//! #ifdef FRAGMENT
//! layout(location = 0) out vec4 oColor;
//! void main() { oColor = vec4(1.0); }
//! #endif
//! #endif
//! ```
//!
//! [`compile_program`] composes both variants, parses and validates them with
//! naga, reflects the active vertex attributes and resource slots, checks that
//! the stages link, and emits WGSL for the device.
//!
//! # Resource conventions
//!
//! | set | binding        | resource                      |
//! |-----|----------------|-------------------------------|
//! | 0   | 0              | global uniform block          |
//! | 1   | 0              | local (per-entity) block      |
//! | 2   | 0              | material block                |
//! | 3   | `2 * unit`     | texture bound at `unit`       |
//! | 3   | `2 * unit + 1` | sampler paired with `unit`    |

mod reflect;

use std::path::PathBuf;

use thiserror::Error;

use crate::backend::ProgramInterface;

pub use reflect::{component_count, reflect_interface, StageInterface};

/// GLSL version every composed variant is compiled as
pub const GLSL_VERSION: &str = "#version 450";

/// Bind group set that holds texture/sampler pairs
pub const TEXTURE_SET: u32 = 3;

/// Shader errors
#[derive(Error, Debug)]
pub enum ShaderError {
    #[error("Failed to read shader {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{stage:?} shader of {program} failed to compile:\n{message}")]
    Parse {
        program: String,
        stage: ShaderStage,
        message: String,
    },
    #[error("{stage:?} shader of {program} failed validation: {message}")]
    Validation {
        program: String,
        stage: ShaderStage,
        message: String,
    },
    #[error("Program {program} failed to link: {message}")]
    Link { program: String, message: String },
    #[error("Failed to emit {stage:?} shader of {program}: {message}")]
    Emit {
        program: String,
        stage: ShaderStage,
        message: String,
    },
}

pub type ShaderResult<T> = Result<T, ShaderError>;

/// Shader stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    /// Macro that gates this stage's section of a program file.
    pub fn define(&self) -> &'static str {
        match self {
            ShaderStage::Vertex => "VERTEX",
            ShaderStage::Fragment => "FRAGMENT",
        }
    }

    fn to_naga(self) -> naga::ShaderStage {
        match self {
            ShaderStage::Vertex => naga::ShaderStage::Vertex,
            ShaderStage::Fragment => naga::ShaderStage::Fragment,
        }
    }
}

/// A linked program ready to be created on a device.
#[derive(Debug, Clone)]
pub struct CompiledProgram {
    pub name: String,
    pub vertex_wgsl: String,
    pub fragment_wgsl: String,
    pub interface: ProgramInterface,
}

/// Compose the source of one stage variant.
///
/// The version directive, the program name macro and the stage macro are
/// prepended. A `#version` line already present in the file is dropped.
pub fn compose(source: &str, program_name: &str, stage: ShaderStage) -> String {
    let body = match source.trim_start().strip_prefix("#version") {
        Some(rest) => rest.split_once('\n').map(|(_, body)| body).unwrap_or(""),
        None => source,
    };

    let mut composed = String::with_capacity(body.len() + 64);
    composed.push_str(GLSL_VERSION);
    composed.push('\n');
    composed.push_str("#define ");
    composed.push_str(program_name);
    composed.push('\n');
    composed.push_str("#define ");
    composed.push_str(stage.define());
    composed.push('\n');
    composed.push_str(body);
    composed
}

/// Parse one stage variant into a naga module.
pub fn parse_stage(source: &str, program_name: &str, stage: ShaderStage) -> ShaderResult<naga::Module> {
    let composed = compose(source, program_name, stage);
    let options = naga::front::glsl::Options::from(stage.to_naga());

    let mut frontend = naga::front::glsl::Frontend::default();
    frontend
        .parse(&options, &composed)
        .map_err(|errors| ShaderError::Parse {
            program: program_name.to_string(),
            stage,
            message: errors.to_string(),
        })
}

struct ValidatedStage {
    module: naga::Module,
    info: naga::valid::ModuleInfo,
}

fn validate_stage(
    module: naga::Module,
    program_name: &str,
    stage: ShaderStage,
) -> ShaderResult<ValidatedStage> {
    if !module.entry_points.iter().any(|ep| ep.stage == stage.to_naga()) {
        return Err(ShaderError::Validation {
            program: program_name.to_string(),
            stage,
            message: "no main function in this stage".to_string(),
        });
    }

    let mut validator = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    );
    let info = validator
        .validate(&module)
        .map_err(|e| ShaderError::Validation {
            program: program_name.to_string(),
            stage,
            message: e.to_string(),
        })?;
    Ok(ValidatedStage { module, info })
}

fn emit_wgsl(stage_module: &ValidatedStage, program_name: &str, stage: ShaderStage) -> ShaderResult<String> {
    naga::back::wgsl::write_string(
        &stage_module.module,
        &stage_module.info,
        naga::back::wgsl::WriterFlags::empty(),
    )
    .map_err(|e| ShaderError::Emit {
        program: program_name.to_string(),
        stage,
        message: e.to_string(),
    })
}

/// Compile and link the program `program_name` from a GLSL file's contents.
pub fn compile_program(source: &str, program_name: &str) -> ShaderResult<CompiledProgram> {
    let vertex = validate_stage(
        parse_stage(source, program_name, ShaderStage::Vertex)?,
        program_name,
        ShaderStage::Vertex,
    )?;
    let fragment = validate_stage(
        parse_stage(source, program_name, ShaderStage::Fragment)?,
        program_name,
        ShaderStage::Fragment,
    )?;

    let vertex_interface = reflect_interface(&vertex.module, naga::ShaderStage::Vertex);
    let fragment_interface = reflect_interface(&fragment.module, naga::ShaderStage::Fragment);
    let interface = reflect::link(&vertex_interface, &fragment_interface).map_err(|message| {
        ShaderError::Link {
            program: program_name.to_string(),
            message,
        }
    })?;

    let vertex_wgsl = emit_wgsl(&vertex, program_name, ShaderStage::Vertex)?;
    let fragment_wgsl = emit_wgsl(&fragment, program_name, ShaderStage::Fragment)?;

    log::debug!(
        "Compiled program {} ({} attributes, {} outputs, {} uniform slots, {} texture units)",
        program_name,
        interface.attributes.len(),
        interface.color_outputs,
        interface.uniform_slots.len(),
        interface.texture_units.len()
    );

    Ok(CompiledProgram {
        name: program_name.to_string(),
        vertex_wgsl,
        fragment_wgsl,
        interface,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ProgramAttribute, TextureDimension};

    const TEXTURED: &str = r#"
#ifdef TEXTURED
#ifdef VERTEX
layout(location = 0) in vec3 aPosition;
layout(location = 1) in vec2 aTexCoord;

layout(std140, set = 1, binding = 0) uniform LocalParams {
    mat4 uWorldMatrix;
    mat4 uWorldViewProjectionMatrix;
};

layout(location = 0) out vec2 vTexCoord;

void main() {
    vTexCoord = aTexCoord;
    gl_Position = uWorldViewProjectionMatrix * vec4(aPosition, 1.0);
}
#endif

#ifdef FRAGMENT
layout(location = 0) in vec2 vTexCoord;

layout(set = 3, binding = 0) uniform texture2D uTexture;
layout(set = 3, binding = 1) uniform sampler uSampler;

layout(location = 0) out vec4 oColor;

void main() {
    oColor = texture(sampler2D(uTexture, uSampler), vTexCoord);
}
#endif
#endif
"#;

    #[test]
    fn test_compose_prepends_defines() {
        let composed = compose("#version 430\nvoid main() {}\n", "SKYBOX", ShaderStage::Fragment);
        let lines: Vec<&str> = composed.lines().collect();

        assert_eq!(lines[0], GLSL_VERSION);
        assert_eq!(lines[1], "#define SKYBOX");
        assert_eq!(lines[2], "#define FRAGMENT");
        assert_eq!(lines[3], "void main() {}");
        assert_eq!(composed.matches("#version").count(), 1);
    }

    #[test]
    fn test_compile_reflects_interface() {
        let program = compile_program(TEXTURED, "TEXTURED").unwrap();

        let mut attributes = program.interface.attributes.clone();
        attributes.sort_by_key(|a| a.location);
        assert_eq!(
            attributes,
            vec![
                ProgramAttribute { location: 0, components: 3 },
                ProgramAttribute { location: 1, components: 2 },
            ]
        );
        assert_eq!(program.interface.color_outputs, 1);

        let local = program
            .interface
            .uniform_slots
            .iter()
            .find(|s| s.slot == 1)
            .unwrap();
        assert_eq!(local.min_size, 128);

        assert_eq!(program.interface.texture_units.len(), 1);
        assert_eq!(program.interface.texture_units[0].unit, 0);
        assert_eq!(
            program.interface.texture_units[0].dimension,
            TextureDimension::D2
        );
        assert!(program.vertex_wgsl.contains("fn main"));
    }

    #[test]
    fn test_unknown_program_name_fails() {
        // Neither stage defines main when the name macro does not match
        let result = compile_program(TEXTURED, "SOMETHING_ELSE");
        assert!(result.is_err());
    }

    #[test]
    fn test_broken_fragment_stage() {
        let broken = TEXTURED.replace("oColor = texture", "oColor = undefined_call");
        let err = compile_program(&broken, "TEXTURED").unwrap_err();
        match err {
            ShaderError::Parse { stage, .. } | ShaderError::Validation { stage, .. } => {
                assert_eq!(stage, ShaderStage::Fragment)
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_link_mismatch() {
        let source = r#"
#ifdef VERTEX
layout(location = 0) in vec3 aPosition;
layout(location = 0) out vec2 vTexCoord;
void main() {
    vTexCoord = aPosition.xy;
    gl_Position = vec4(aPosition, 1.0);
}
#endif
#ifdef FRAGMENT
layout(location = 0) in vec2 vTexCoord;
layout(location = 3) in vec3 vNormal;
layout(location = 0) out vec4 oColor;
void main() {
    oColor = vec4(vTexCoord, vNormal.x, 1.0);
}
#endif
"#;
        let err = compile_program(source, "MISMATCH").unwrap_err();
        assert!(matches!(err, ShaderError::Link { .. }), "{err:?}");
    }
}
