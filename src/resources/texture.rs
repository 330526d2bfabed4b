//! Texture loading and management

use std::path::{Path, PathBuf};

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::error::AssetError;

/// Cubemap face file stems, in layer order
pub const CUBEMAP_FACES: [&str; 6] = ["right", "left", "top", "bottom", "front", "back"];

/// Decoded RGBA8 pixels
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
    pub name: String,
}

impl TextureData {
    /// Load and decode an image file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, AssetError> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();

        let img = image::open(path).map_err(|source| AssetError::Image {
            path: path.to_path_buf(),
            source,
        })?;
        let rgba = img.to_rgba8();
        let (width, height) = rgba.dimensions();

        Ok(Self {
            width,
            height,
            data: rgba.into_raw(),
            name,
        })
    }

    /// Create a solid color texture
    pub fn solid_color(color: [u8; 4], name: &str) -> Self {
        Self {
            width: 1,
            height: 1,
            data: color.to_vec(),
            name: name.to_string(),
        }
    }

    pub fn white() -> Self {
        Self::solid_color([255, 255, 255, 255], "white")
    }
}

/// Six decoded faces of equal size
pub struct CubemapData {
    pub size: u32,
    pub faces: Vec<Vec<u8>>,
    pub name: String,
}

impl CubemapData {
    /// Load `<face>.jpg` for every face in `dir`
    pub fn from_dir<P: AsRef<Path>>(dir: P) -> Result<Self, AssetError> {
        let dir = dir.as_ref();
        std::fs::read_dir(dir).map_err(|source| AssetError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let mut faces = Vec::with_capacity(CUBEMAP_FACES.len());
        let mut size = None;

        for (index, face) in CUBEMAP_FACES.iter().enumerate() {
            let data = TextureData::from_file(dir.join(format!("{face}.jpg")))?;
            let expected = *size.get_or_insert((data.width, data.height));
            if (data.width, data.height) != expected || data.width != data.height {
                return Err(AssetError::CubemapFaceMismatch {
                    face: index,
                    expected,
                    found: (data.width, data.height),
                });
            }
            faces.push(data.data);
        }

        Ok(Self {
            size: size.map(|(w, _)| w).unwrap_or(1),
            faces,
            name: dir.display().to_string(),
        })
    }

    pub fn solid_color(color: [u8; 4], name: &str) -> Self {
        Self {
            size: 1,
            faces: vec![color.to_vec(); 6],
            name: name.to_string(),
        }
    }
}

/// A texture living on the device
#[derive(Debug)]
pub struct Texture {
    pub handle: TextureHandle,
    pub width: u32,
    pub height: u32,
    pub dimension: TextureDimension,
    pub name: String,
    /// File the texture was loaded from, if any
    pub path: Option<PathBuf>,
}

impl Texture {
    /// Create and upload a 2D texture
    pub fn create<D: RenderDevice>(device: &mut D, data: &TextureData) -> BackendResult<Self> {
        let handle = device.create_texture(&TextureDescriptor {
            label: Some(data.name.clone()),
            width: data.width,
            height: data.height,
            ..Default::default()
        })?;
        device.write_texture(handle, 0, &data.data)?;

        Ok(Self {
            handle,
            width: data.width,
            height: data.height,
            dimension: TextureDimension::D2,
            name: data.name.clone(),
            path: None,
        })
    }

    /// Create and upload a cubemap, one layer per face
    pub fn create_cubemap<D: RenderDevice>(
        device: &mut D,
        data: &CubemapData,
    ) -> BackendResult<Self> {
        let handle = device.create_texture(&TextureDescriptor {
            label: Some(data.name.clone()),
            width: data.size,
            height: data.size,
            dimension: TextureDimension::Cube,
            address_mode: AddressMode::ClampToEdge,
            ..Default::default()
        })?;
        for (layer, face) in data.faces.iter().enumerate() {
            device.write_texture(handle, layer as u32, face)?;
        }

        Ok(Self {
            handle,
            width: data.size,
            height: data.size,
            dimension: TextureDimension::Cube,
            name: data.name.clone(),
            path: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyDevice;

    #[test]
    fn test_missing_image() {
        let err = TextureData::from_file("/nonexistent/dice.png").err().unwrap();
        assert!(matches!(err, AssetError::Image { .. }));
    }

    #[test]
    fn test_missing_cubemap_dir() {
        let err = CubemapData::from_dir("/nonexistent/skybox").err().unwrap();
        match err {
            AssetError::Io { path, source } => {
                assert_eq!(path, Path::new("/nonexistent/skybox"));
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_decode_png() {
        let dir = std::env::temp_dir().join(format!("renderlab_texture_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("checker.png");
        image::RgbImage::from_fn(4, 2, |x, _| {
            if x % 2 == 0 {
                image::Rgb([255, 0, 0])
            } else {
                image::Rgb([0, 0, 255])
            }
        })
        .save(&path)
        .unwrap();

        let data = TextureData::from_file(&path).unwrap();
        assert_eq!((data.width, data.height), (4, 2));
        assert_eq!(data.data.len(), 4 * 2 * 4);
        assert_eq!(&data.data[0..4], &[255, 0, 0, 255]);
    }

    #[test]
    fn test_create_cubemap() {
        let mut device = DummyDevice::new();
        let texture =
            Texture::create_cubemap(&mut device, &CubemapData::solid_color([255; 4], "white_cube"))
                .unwrap();

        let desc = device.texture_descriptor(texture.handle).unwrap();
        assert_eq!(desc.dimension, TextureDimension::Cube);
        assert_eq!(texture.dimension, TextureDimension::Cube);
    }
}
