//! Engine error types

use std::path::PathBuf;

use thiserror::Error;

use crate::backend::BackendError;
use crate::frame::FrameBufferError;
use crate::shader::ShaderError;

/// Asset loading errors
#[derive(Error, Debug)]
pub enum AssetError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to decode image {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("Failed to load model {path}: {source}")]
    Obj {
        path: PathBuf,
        #[source]
        source: tobj::LoadError,
    },
    #[error("Cubemap face {face} is {found:?}, expected {expected:?}")]
    CubemapFaceMismatch {
        face: usize,
        expected: (u32, u32),
        found: (u32, u32),
    },
}

/// Top-level engine error
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    FrameBuffer(#[from] FrameBufferError),
    #[error(transparent)]
    Shader(#[from] ShaderError),
    #[error(transparent)]
    Asset(#[from] AssetError),
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::from(FrameBufferError::OutOfSpace {
            offset: 1020,
            size: 16,
            capacity: 1024,
        });
        assert_eq!(
            err.to_string(),
            "Frame buffer out of space: 16 bytes at offset 1020 exceeds capacity 1024"
        );

        let err = EngineError::from(AssetError::CubemapFaceMismatch {
            face: 3,
            expected: (64, 64),
            found: (32, 32),
        });
        assert!(err.to_string().contains("face 3"));
    }
}
