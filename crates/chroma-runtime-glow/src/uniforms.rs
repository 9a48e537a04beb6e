use std::collections::HashMap;
use std::fmt;

use chroma_runtime::runtime_contract::{
    REQUIRED_UNIFORMS, U_ALPHA, U_BLUE, U_GREEN, U_IMAGE, U_RED, U_RESOLUTION,
};
use chroma_runtime::{ChannelScale, EngineError};

use crate::backend::GlBackend;
use crate::program::ShaderProgram;

/// A resolved uniform slot.
pub struct UniformHandle<G: GlBackend> {
    name: String,
    loc: G::UniformLocation,
}

impl<G: GlBackend> UniformHandle<G> {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<G: GlBackend> Clone for UniformHandle<G> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            loc: self.loc.clone(),
        }
    }
}

impl<G: GlBackend> fmt::Debug for UniformHandle<G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UniformHandle")
            .field("name", &self.name)
            .field("loc", &self.loc)
            .finish()
    }
}

/// Uniform handles resolved once per program, keyed by name.
///
/// Setters write into the program currently in use and affect the next draw only.
pub struct UniformRegistry<G: GlBackend> {
    handles: HashMap<String, UniformHandle<G>>,
}

impl<G: GlBackend> UniformRegistry<G> {
    /// Look up every name in `names`. Fails naming each one the program does not declare
    /// (or declares but never uses, which drivers treat the same way).
    pub unsafe fn resolve(
        gl: &G,
        program: &ShaderProgram<G>,
        names: &[&str],
    ) -> Result<Self, EngineError> {
        let mut handles = HashMap::with_capacity(names.len());
        let mut missing = Vec::new();
        for &name in names {
            match gl.get_uniform_location(program.program, name) {
                Some(loc) => {
                    handles.insert(
                        name.to_string(),
                        UniformHandle {
                            name: name.to_string(),
                            loc,
                        },
                    );
                }
                None => missing.push(name),
            }
        }

        if !missing.is_empty() {
            tracing::error!(?missing, "uniform resolution failed");
            return Err(EngineError::UniformResolution(
                missing.into_iter().map(str::to_string).collect(),
            ));
        }
        Ok(Self { handles })
    }

    /// Resolve a uniform the caller can live without.
    pub unsafe fn resolve_optional(
        gl: &G,
        program: &ShaderProgram<G>,
        name: &str,
    ) -> Option<UniformHandle<G>> {
        gl.get_uniform_location(program.program, name)
            .map(|loc| UniformHandle {
                name: name.to_string(),
                loc,
            })
    }

    pub fn get(&self, name: &str) -> Option<&UniformHandle<G>> {
        self.handles.get(name)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub unsafe fn set_float(gl: &G, handle: &UniformHandle<G>, value: f32) {
        gl.uniform_1_f32(Some(&handle.loc), value);
    }

    pub unsafe fn set_vec2(gl: &G, handle: &UniformHandle<G>, x: f32, y: f32) {
        gl.uniform_2_f32(Some(&handle.loc), x, y);
    }

    pub unsafe fn set_sampler(gl: &G, handle: &UniformHandle<G>, unit: u32) {
        gl.uniform_1_i32(Some(&handle.loc), unit as i32);
    }

    fn take(&mut self, name: &str) -> Result<UniformHandle<G>, EngineError> {
        self.handles
            .remove(name)
            .ok_or_else(|| EngineError::UniformResolution(vec![name.to_string()]))
    }
}

impl<G: GlBackend> fmt::Debug for UniformRegistry<G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.handles.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("UniformRegistry")
            .field("names", &names)
            .finish()
    }
}

/// Typed handles for the color-filter program, so redraws never look names up.
pub struct FilterUniforms<G: GlBackend> {
    pub resolution: UniformHandle<G>,
    pub r: UniformHandle<G>,
    pub g: UniformHandle<G>,
    pub b: UniformHandle<G>,
    pub a: UniformHandle<G>,
    pub image: Option<UniformHandle<G>>,
}

impl<G: GlBackend> FilterUniforms<G> {
    pub unsafe fn resolve(gl: &G, program: &ShaderProgram<G>) -> Result<Self, EngineError> {
        let mut reg = UniformRegistry::resolve(gl, program, &REQUIRED_UNIFORMS)?;
        Ok(Self {
            resolution: reg.take(U_RESOLUTION)?,
            r: reg.take(U_RED)?,
            g: reg.take(U_GREEN)?,
            b: reg.take(U_BLUE)?,
            a: reg.take(U_ALPHA)?,
            image: UniformRegistry::resolve_optional(gl, program, U_IMAGE),
        })
    }

    pub unsafe fn set_resolution(&self, gl: &G, width: f32, height: f32) {
        UniformRegistry::set_vec2(gl, &self.resolution, width, height);
    }

    pub unsafe fn set_rgb(&self, gl: &G, r: f32, g: f32, b: f32) {
        UniformRegistry::set_float(gl, &self.r, r);
        UniformRegistry::set_float(gl, &self.g, g);
        UniformRegistry::set_float(gl, &self.b, b);
    }

    pub unsafe fn set_scale(&self, gl: &G, scale: ChannelScale) {
        self.set_rgb(gl, scale.r, scale.g, scale.b);
        UniformRegistry::set_float(gl, &self.a, scale.a);
    }
}

impl<G: GlBackend> fmt::Debug for FilterUniforms<G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterUniforms")
            .field("resolution", &self.resolution)
            .field("r", &self.r)
            .field("g", &self.g)
            .field("b", &self.b)
            .field("a", &self.a)
            .field("image", &self.image)
            .finish()
    }
}
