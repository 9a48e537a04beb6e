#![deny(rustdoc::broken_intra_doc_links)]
#![deny(missing_debug_implementations)]

pub mod config;
pub mod error;
pub mod image;

pub use config::{invalid_config, load_typed_json, load_typed_json_or_default, parse_typed_json};
pub use error::{EngineError, ShaderStage};
pub use image::DecodedImage;
