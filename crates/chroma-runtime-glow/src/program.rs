//! Shader compilation and program linking.

use std::fmt;

use chroma_runtime::{EngineError, ShaderSource, ShaderStage};

use crate::backend::GlBackend;

fn gl_shader_type(stage: ShaderStage) -> u32 {
    match stage {
        ShaderStage::Vertex => glow::VERTEX_SHADER,
        ShaderStage::Fragment => glow::FRAGMENT_SHADER,
    }
}

/// A shader that compiled successfully and has not been linked yet.
pub struct CompiledShader<G: GlBackend> {
    shader: G::Shader,
    stage: ShaderStage,
}

impl<G: GlBackend> CompiledShader<G> {
    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    /// Release without linking (e.g. the other stage failed).
    pub unsafe fn discard(self, gl: &G) {
        gl.delete_shader(self.shader);
    }
}

impl<G: GlBackend> fmt::Debug for CompiledShader<G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledShader")
            .field("shader", &self.shader)
            .field("stage", &self.stage)
            .finish()
    }
}

/// Submit `source` to the driver and compile it. No retry: the log is returned as-is.
pub unsafe fn compile_shader<G: GlBackend>(
    gl: &G,
    source: &ShaderSource,
) -> Result<CompiledShader<G>, EngineError> {
    let stage = source.stage;
    let shader = gl
        .create_shader(gl_shader_type(stage))
        .map_err(|e| EngineError::GlCreate(format!("create_shader({stage}) failed: {e}")))?;
    gl.shader_source(shader, &source.text);
    gl.compile_shader(shader);
    if !gl.get_shader_compile_status(shader) {
        let log = gl.get_shader_info_log(shader);
        gl.delete_shader(shader);
        tracing::error!(%stage, %log, "shader compile failed");
        return Err(EngineError::ShaderCompile { stage, log });
    }
    tracing::debug!(%stage, "shader compiled");
    Ok(CompiledShader { shader, stage })
}

/// Link a vertex and a fragment shader into a program.
///
/// Both shaders are consumed: they are detached and deleted whether or not linking succeeds.
pub unsafe fn link_program<G: GlBackend>(
    gl: &G,
    vertex: CompiledShader<G>,
    fragment: CompiledShader<G>,
) -> Result<ShaderProgram<G>, EngineError> {
    if vertex.stage != ShaderStage::Vertex || fragment.stage != ShaderStage::Fragment {
        let msg = format!(
            "expected vertex + fragment, got {} + {}",
            vertex.stage, fragment.stage
        );
        vertex.discard(gl);
        fragment.discard(gl);
        return Err(EngineError::ProgramLink(msg));
    }

    let program = match gl.create_program() {
        Ok(p) => p,
        Err(e) => {
            vertex.discard(gl);
            fragment.discard(gl);
            return Err(EngineError::GlCreate(format!("create_program failed: {e}")));
        }
    };
    gl.attach_shader(program, vertex.shader);
    gl.attach_shader(program, fragment.shader);
    gl.link_program(program);

    gl.detach_shader(program, vertex.shader);
    gl.detach_shader(program, fragment.shader);
    gl.delete_shader(vertex.shader);
    gl.delete_shader(fragment.shader);

    if !gl.get_program_link_status(program) {
        let log = gl.get_program_info_log(program);
        gl.delete_program(program);
        tracing::error!(%log, "program link failed");
        return Err(EngineError::ProgramLink(log));
    }

    Ok(ShaderProgram { program })
}

/// Compile both stages and link them.
pub unsafe fn compile_program<G: GlBackend>(
    gl: &G,
    vertex: &ShaderSource,
    fragment: &ShaderSource,
) -> Result<ShaderProgram<G>, EngineError> {
    let vs = compile_shader(gl, vertex)?;
    let fs = match compile_shader(gl, fragment) {
        Ok(fs) => fs,
        Err(e) => {
            vs.discard(gl);
            return Err(e);
        }
    };
    link_program(gl, vs, fs)
}

/// A linked, validated program.
pub struct ShaderProgram<G: GlBackend> {
    pub program: G::Program,
}

impl<G: GlBackend> ShaderProgram<G> {
    pub unsafe fn new(
        gl: &G,
        vertex: &ShaderSource,
        fragment: &ShaderSource,
    ) -> Result<Self, EngineError> {
        compile_program(gl, vertex, fragment)
    }

    pub unsafe fn bind(&self, gl: &G) {
        gl.use_program(Some(self.program));
    }

    pub unsafe fn destroy(&mut self, gl: &G) {
        gl.use_program(None);
        gl.delete_program(self.program);
    }
}

impl<G: GlBackend> fmt::Debug for ShaderProgram<G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShaderProgram")
            .field("program", &self.program)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shaders::{COLOR_FILTER_FRAG, COLOR_FILTER_VERT};
    use crate::soft::SoftGl;

    #[test]
    fn builtin_sources_compile_and_link() {
        let gl = SoftGl::new();
        let program = unsafe {
            compile_program(
                &gl,
                &ShaderSource::vertex(COLOR_FILTER_VERT),
                &ShaderSource::fragment(COLOR_FILTER_FRAG),
            )
        }
        .expect("builtin program");
        // Shaders are released after linking; only the program remains.
        assert_eq!(gl.live_shader_count(), 0);
        assert!(gl.is_program(program.program));
    }

    #[test]
    fn compile_error_carries_stage_and_log() {
        let gl = SoftGl::new();
        let err = unsafe { compile_shader(&gl, &ShaderSource::vertex("void main( {")) }
            .expect_err("malformed");
        match err {
            EngineError::ShaderCompile { stage, log } => {
                assert_eq!(stage, ShaderStage::Vertex);
                assert!(log.contains("error"), "log: {log}");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(gl.live_shader_count(), 0);
    }

    #[test]
    fn fragment_failure_releases_vertex_shader() {
        let gl = SoftGl::new();
        let err = unsafe {
            compile_program(
                &gl,
                &ShaderSource::vertex(COLOR_FILTER_VERT),
                &ShaderSource::fragment("void main() { o = vec4(1.0; }"),
            )
        }
        .expect_err("fragment is malformed");
        assert!(matches!(
            err,
            EngineError::ShaderCompile {
                stage: ShaderStage::Fragment,
                ..
            }
        ));
        assert_eq!(gl.live_shader_count(), 0);
    }

    fn fragment_log(frag: &str) -> String {
        let gl = SoftGl::new();
        let err = unsafe { compile_shader(&gl, &ShaderSource::fragment(frag)) }
            .expect_err("fragment is malformed");
        assert_eq!(gl.live_shader_count(), 0);
        match err {
            EngineError::ShaderCompile {
                stage: ShaderStage::Fragment,
                log,
            } => log,
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_semicolon_fails_compilation() {
        let frag = COLOR_FILTER_FRAG.replace("vec4(r, g, b, a);", "vec4(r, g, b, a)");
        let log = fragment_log(&frag);
        assert!(log.starts_with("0:"), "log: {log}");
    }

    #[test]
    fn undeclared_identifier_fails_compilation() {
        let frag = COLOR_FILTER_FRAG.replace("vec4(r, g, b, a)", "vec4(r, g, b, brightness)");
        let log = fragment_log(&frag);
        assert!(log.contains("brightness"), "log: {log}");
        assert!(log.starts_with("0:12: error"), "log: {log}");
    }

    #[test]
    fn operand_type_mismatch_fails_compilation() {
        let frag = COLOR_FILTER_FRAG.replace("vec4(r, g, b, a)", "vec3(r, g, b)");
        let log = fragment_log(&frag);
        assert!(log.contains("error"), "log: {log}");
    }

    #[test]
    fn mismatched_varying_fails_to_link() {
        let gl = SoftGl::new();
        let frag = COLOR_FILTER_FRAG.replace("v_texCoord", "v_uv");
        let err = unsafe {
            compile_program(
                &gl,
                &ShaderSource::vertex(COLOR_FILTER_VERT),
                &ShaderSource::fragment(frag),
            )
        }
        .expect_err("v_uv is never written");
        match err {
            EngineError::ProgramLink(log) => assert!(log.contains("v_uv"), "log: {log}"),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(gl.live_program_count(), 0);
    }

    #[test]
    fn swapped_stages_are_rejected() {
        let gl = SoftGl::new();
        unsafe {
            let vs = compile_shader(&gl, &ShaderSource::vertex(COLOR_FILTER_VERT)).expect("vs");
            let fs =
                compile_shader(&gl, &ShaderSource::fragment(COLOR_FILTER_FRAG)).expect("fs");
            let err = link_program(&gl, fs, vs).expect_err("stages swapped");
            assert!(matches!(err, EngineError::ProgramLink(_)));
        }
        assert_eq!(gl.live_shader_count(), 0);
    }
}
