//! chroma runtime (glow/OpenGL backend)
//
// This crate contains only the GPU side of the color filter:
// - compile/link the filter program
// - upload the quad geometry and the image texture
// - resolve uniforms and redraw on demand
//
// It does NOT contain windowing, image decoding, keyboard handling or OSC.
// Everything is generic over `GlBackend` so the same code drives a real context
// (`glow::Context`) or the headless `SoftGl`.
#![allow(clippy::missing_safety_doc)]
#![deny(missing_debug_implementations)]

pub mod backend;
pub mod geometry;
pub mod pipeline;
pub mod program;
pub mod shaders;
pub mod soft;
pub mod texture;
pub mod uniforms;

pub use backend::GlBackend;
pub use geometry::GeometryBuffer;
pub use pipeline::{PipelineStatus, RenderPipeline, SurfaceSize};
pub use program::{compile_program, compile_shader, link_program, CompiledShader, ShaderProgram};
pub use shaders::{COLOR_FILTER_FRAG, COLOR_FILTER_VERT};
pub use soft::SoftGl;
pub use texture::{ImageTexture, IMAGE_TEXTURE_UNIT};
pub use uniforms::{FilterUniforms, UniformHandle, UniformRegistry};

pub use chroma_core::{DecodedImage, EngineError};
pub use chroma_runtime::{ChannelScale, ChannelScaleSink, ShaderSource, UniformState};
