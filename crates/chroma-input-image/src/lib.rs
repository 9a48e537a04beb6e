//! Still-image input: decode a file from disk into a [`DecodedImage`].
//!
//! PNG, JPEG, BMP and GIF (first frame) are accepted. Everything is converted to
//! tightly packed RGBA8 with the first row at the top, which is what the runtime uploads.

use std::io;
use std::path::{Path, PathBuf};

use chroma_core::{DecodedImage, EngineError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageConfig {
    /// Input file path.
    pub file: String,

    /// Largest accepted width or height. Textures beyond the driver limit fail late
    /// and opaquely, so oversized images are rejected up front.
    #[serde(default = "default_max_side")]
    pub max_side: u32,
}

fn default_max_side() -> u32 {
    16384
}

impl ImageConfig {
    pub fn new(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            max_side: default_max_side(),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ImageError {
    #[error("image file not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("image is {width}x{height}, larger than the {max}px limit")]
    TooLarge { width: u32, height: u32, max: u32 },

    #[error("image has no pixels")]
    Empty,

    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl From<ImageError> for EngineError {
    fn from(e: ImageError) -> Self {
        match e {
            ImageError::Read { path, source } => EngineError::Io { path, source },
            other => EngineError::InvalidImage(other.to_string()),
        }
    }
}

/// Load and decode `path` with the default size limit.
pub fn load_image(path: impl AsRef<Path>) -> Result<DecodedImage, ImageError> {
    load_image_with_limit(path.as_ref(), default_max_side())
}

/// Load the image a config points at.
pub fn load_from_config(cfg: &ImageConfig) -> Result<DecodedImage, ImageError> {
    if cfg.file.trim().is_empty() {
        return Err(ImageError::InvalidConfig("file is empty".into()));
    }
    if cfg.max_side == 0 {
        return Err(ImageError::InvalidConfig("max_side must be > 0".into()));
    }
    load_image_with_limit(Path::new(&cfg.file), cfg.max_side)
}

fn load_image_with_limit(path: &Path, max_side: u32) -> Result<DecodedImage, ImageError> {
    let bytes = std::fs::read(path).map_err(|source| {
        if source.kind() == io::ErrorKind::NotFound {
            ImageError::NotFound(path.to_path_buf())
        } else {
            ImageError::Read {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;
    decode_bytes(&bytes, max_side).map_err(|e| match e {
        ImageError::Decode { source, .. } => ImageError::Decode {
            path: path.to_path_buf(),
            source,
        },
        other => other,
    })
}

/// Decode an in-memory encoded image (format sniffed from the header).
pub fn decode_bytes(bytes: &[u8], max_side: u32) -> Result<DecodedImage, ImageError> {
    let decoded = image::load_from_memory(bytes).map_err(|source| ImageError::Decode {
        path: PathBuf::from("<memory>"),
        source,
    })?;

    let rgba = decoded.to_rgba8();
    let (width, height) = rgba.dimensions();
    if width == 0 || height == 0 {
        return Err(ImageError::Empty);
    }
    if width > max_side || height > max_side {
        return Err(ImageError::TooLarge {
            width,
            height,
            max: max_side,
        });
    }

    DecodedImage::new(width, height, rgba.into_raw()).map_err(|_| ImageError::Empty)
}
