use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use chroma_controls::ControlsConfig;
use chroma_core::{invalid_config, load_typed_json, EngineError};
use chroma_input_image::ImageConfig;
use serde::{Deserialize, Serialize};

use crate::cli::Cli;

/// JSON config for the viewer. Every field is optional; CLI flags win over the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewerConfig {
    #[serde(default = "default_image")]
    pub image: String,

    #[serde(default = "default_title")]
    pub title: String,

    /// UDP address for OSC filter messages; OSC is off when absent.
    #[serde(default)]
    pub osc: Option<String>,

    #[serde(default)]
    pub controls: ControlsConfig,
}

fn default_image() -> String {
    "image.jpg".to_string()
}

fn default_title() -> String {
    "chroma".to_string()
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            image: default_image(),
            title: default_title(),
            osc: None,
            controls: ControlsConfig::default(),
        }
    }
}

impl ViewerConfig {
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let cfg: Self = load_typed_json(path)?;
        cfg.validate(path)?;
        Ok(cfg)
    }

    /// Resolve the effective config: file (if any), then CLI overrides.
    pub fn from_cli(cli: &Cli) -> Result<Self, EngineError> {
        let mut cfg = match &cli.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        if let Some(image) = &cli.image {
            cfg.image = image.display().to_string();
        }
        if let Some(title) = &cli.title {
            cfg.title = title.clone();
        }
        if let Some(osc) = &cli.osc {
            cfg.osc = Some(osc.clone());
        }
        cfg.validate(Path::new("<command line>"))?;
        Ok(cfg)
    }

    pub fn validate(&self, origin: &Path) -> Result<(), EngineError> {
        if self.image.trim().is_empty() {
            return Err(invalid_config(origin, "image path is empty"));
        }
        if let Some(addr) = &self.osc {
            addr.parse::<SocketAddr>().map_err(|e| {
                invalid_config(origin, format!("osc address '{addr}' is invalid: {e}"))
            })?;
        }
        Ok(())
    }

    pub fn image_config(&self) -> ImageConfig {
        ImageConfig::new(self.image.clone())
    }

    pub fn image_path(&self) -> PathBuf {
        PathBuf::from(&self.image)
    }
}
