use std::fmt;

use chroma_runtime::runtime_contract::{
    flatten_pairs, rectangle_vertices, A_POSITION, A_TEX_COORD, TEX_COORD_QUAD,
};
use chroma_runtime::EngineError;

use crate::backend::GlBackend;
use crate::program::ShaderProgram;

/// The two vertex attribute buffers of the screen quad, plus the VAO recording their layout.
///
/// - tex-coord buffer: static unit quad, uploaded once
/// - position buffer: rectangle in pixels, replaceable via `set_position_rectangle`
pub struct GeometryBuffer<G: GlBackend> {
    vao: G::VertexArray,
    tex_coord_vbo: G::Buffer,
    position_vbo: G::Buffer,
    position_loc: u32,
    tex_coord_loc: u32,
    positions: [[f32; 2]; 6],
}

unsafe fn resolve_attrib<G: GlBackend>(
    gl: &G,
    program: &ShaderProgram<G>,
    name: &str,
) -> Result<u32, EngineError> {
    gl.get_attrib_location(program.program, name)
        .ok_or_else(|| EngineError::AttributeResolution(name.to_string()))
}

unsafe fn upload_f32<G: GlBackend>(gl: &G, buffer: G::Buffer, data: &[f32], usage: u32) {
    gl.bind_buffer(glow::ARRAY_BUFFER, Some(buffer));
    gl.buffer_data_u8_slice(glow::ARRAY_BUFFER, bytemuck::cast_slice(data), usage);
}

impl<G: GlBackend> GeometryBuffer<G> {
    /// Create both buffers, upload the tex-coord quad and bind both attributes.
    ///
    /// The position buffer starts empty; call `set_position_rectangle` before drawing.
    pub unsafe fn new(gl: &G, program: &ShaderProgram<G>) -> Result<Self, EngineError> {
        let position_loc = resolve_attrib(gl, program, A_POSITION)?;
        let tex_coord_loc = resolve_attrib(gl, program, A_TEX_COORD)?;

        let vao = gl
            .create_vertex_array()
            .map_err(|e| EngineError::GlCreate(format!("create_vertex_array: {e}")))?;
        let tex_coord_vbo = match gl.create_buffer() {
            Ok(b) => b,
            Err(e) => {
                gl.delete_vertex_array(vao);
                return Err(EngineError::GlCreate(format!("create_buffer: {e}")));
            }
        };
        let position_vbo = match gl.create_buffer() {
            Ok(b) => b,
            Err(e) => {
                gl.delete_buffer(tex_coord_vbo);
                gl.delete_vertex_array(vao);
                return Err(EngineError::GlCreate(format!("create_buffer: {e}")));
            }
        };

        let geometry = Self {
            vao,
            tex_coord_vbo,
            position_vbo,
            position_loc,
            tex_coord_loc,
            positions: [[0.0; 2]; 6],
        };

        gl.bind_vertex_array(Some(vao));

        geometry.upload_tex_coord_quad(gl);
        gl.enable_vertex_attrib_array(tex_coord_loc);
        gl.vertex_attrib_pointer_f32(tex_coord_loc, 2, glow::FLOAT, false, 0, 0);

        // Attribute pointers capture the buffer bound at call time.
        geometry.upload_positions(gl);
        gl.enable_vertex_attrib_array(position_loc);
        gl.vertex_attrib_pointer_f32(position_loc, 2, glow::FLOAT, false, 0, 0);

        gl.bind_buffer(glow::ARRAY_BUFFER, None);
        gl.bind_vertex_array(None);

        Ok(geometry)
    }

    /// Upload the fixed unit-quad texture coordinates.
    pub unsafe fn upload_tex_coord_quad(&self, gl: &G) {
        upload_f32(
            gl,
            self.tex_coord_vbo,
            &flatten_pairs(&TEX_COORD_QUAD),
            glow::STATIC_DRAW,
        );
    }

    /// Replace the position buffer with the rectangle at (x, y) of the given size, in pixels.
    pub unsafe fn set_position_rectangle(
        &mut self,
        gl: &G,
        x: f32,
        y: f32,
        width: f32,
        height: f32,
    ) {
        self.positions = rectangle_vertices(x, y, width, height);
        self.upload_positions(gl);
        gl.bind_buffer(glow::ARRAY_BUFFER, None);
    }

    unsafe fn upload_positions(&self, gl: &G) {
        upload_f32(
            gl,
            self.position_vbo,
            &flatten_pairs(&self.positions),
            glow::STATIC_DRAW,
        );
    }

    /// Last uploaded position vertices.
    pub fn positions(&self) -> &[[f32; 2]; 6] {
        &self.positions
    }

    pub unsafe fn bind(&self, gl: &G) {
        gl.bind_vertex_array(Some(self.vao));
    }

    pub unsafe fn destroy(&mut self, gl: &G) {
        gl.bind_vertex_array(None);
        gl.delete_vertex_array(self.vao);
        gl.delete_buffer(self.tex_coord_vbo);
        gl.delete_buffer(self.position_vbo);
    }
}

impl<G: GlBackend> fmt::Debug for GeometryBuffer<G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeometryBuffer")
            .field("vao", &self.vao)
            .field("tex_coord_vbo", &self.tex_coord_vbo)
            .field("position_vbo", &self.position_vbo)
            .field("position_loc", &self.position_loc)
            .field("tex_coord_loc", &self.tex_coord_loc)
            .field("positions", &self.positions)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shaders::{COLOR_FILTER_FRAG, COLOR_FILTER_VERT};
    use crate::soft::SoftGl;
    use chroma_runtime::ShaderSource;

    fn program(gl: &SoftGl) -> ShaderProgram<SoftGl> {
        unsafe {
            ShaderProgram::new(
                gl,
                &ShaderSource::vertex(COLOR_FILTER_VERT),
                &ShaderSource::fragment(COLOR_FILTER_FRAG),
            )
        }
        .expect("program")
    }

    #[test]
    fn uploads_unit_quad_and_rectangle() {
        let gl = SoftGl::new();
        let program = program(&gl);
        let mut geo = unsafe { GeometryBuffer::new(&gl, &program) }.expect("geometry");

        assert_eq!(
            gl.buffer_f32(geo.tex_coord_vbo).expect("tex coords"),
            flatten_pairs(&TEX_COORD_QUAD)
        );

        unsafe { geo.set_position_rectangle(&gl, 0.0, 0.0, 7.0, 3.0) };
        assert_eq!(
            gl.buffer_f32(geo.position_vbo).expect("positions"),
            vec![0.0, 0.0, 7.0, 0.0, 0.0, 3.0, 0.0, 3.0, 7.0, 0.0, 7.0, 3.0]
        );
        assert_eq!(geo.positions()[5], [7.0, 3.0]);
    }

    #[test]
    fn rectangle_can_be_replaced() {
        let gl = SoftGl::new();
        let program = program(&gl);
        let mut geo = unsafe { GeometryBuffer::new(&gl, &program) }.expect("geometry");
        unsafe {
            geo.set_position_rectangle(&gl, 0.0, 0.0, 2.0, 2.0);
            geo.set_position_rectangle(&gl, 1.0, 1.0, 4.0, 4.0);
        }
        assert_eq!(geo.positions()[0], [1.0, 1.0]);
        assert_eq!(geo.positions()[5], [5.0, 5.0]);
        // tex coords untouched
        assert_eq!(
            gl.buffer_f32(geo.tex_coord_vbo).expect("tex coords"),
            flatten_pairs(&TEX_COORD_QUAD)
        );
    }

    #[test]
    fn missing_attribute_is_reported_by_name() {
        let gl = SoftGl::new();
        let vert = COLOR_FILTER_VERT.replace("v_texCoord = a_texCoord;", "v_texCoord = vec2(0.0);");
        let program = unsafe {
            ShaderProgram::new(
                &gl,
                &ShaderSource::vertex(vert),
                &ShaderSource::fragment(COLOR_FILTER_FRAG),
            )
        }
        .expect("program");
        let err = unsafe { GeometryBuffer::new(&gl, &program) }.expect_err("a_texCoord unused");
        assert_eq!(err.to_string(), "vertex attribute 'a_texCoord' is not declared by the program");
    }

    #[test]
    fn destroy_releases_buffers() {
        let gl = SoftGl::new();
        let program = program(&gl);
        let mut geo = unsafe { GeometryBuffer::new(&gl, &program) }.expect("geometry");
        assert_eq!(gl.live_buffer_count(), 2);
        unsafe { geo.destroy(&gl) };
        assert_eq!(gl.live_buffer_count(), 0);
    }
}
