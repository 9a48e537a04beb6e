//! The render pipeline: one image, one program, redrawn on demand.
//!
//! Lifecycle: `Uninitialized` → (`initialize`) → `Ready` | `Failed`.
//! `Failed` is terminal for the surface; only `destroy` (surface teardown) leaves it.

use std::fmt;

use chroma_core::DecodedImage;
use chroma_runtime::runtime_contract::QUAD_VERTEX_COUNT;
use chroma_runtime::{ChannelScale, EngineError, ShaderSource, UniformState};

use crate::backend::GlBackend;
use crate::geometry::GeometryBuffer;
use crate::program::ShaderProgram;
use crate::shaders::{COLOR_FILTER_FRAG, COLOR_FILTER_VERT};
use crate::texture::{ImageTexture, IMAGE_TEXTURE_UNIT};
use crate::uniforms::FilterUniforms;

/// Size of the presentable surface, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceSize {
    pub width: u32,
    pub height: u32,
}

impl SurfaceSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A surface exactly covering `image`.
    pub fn of_image(image: &DecodedImage) -> Self {
        Self::new(image.width(), image.height())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStatus {
    Uninitialized,
    Ready,
    Failed,
}

impl PipelineStatus {
    pub fn name(self) -> &'static str {
        match self {
            PipelineStatus::Uninitialized => "uninitialized",
            PipelineStatus::Ready => "ready",
            PipelineStatus::Failed => "failed",
        }
    }
}

/// GPU objects of a Ready pipeline.
struct ReadyPipeline<G: GlBackend> {
    program: ShaderProgram<G>,
    geometry: GeometryBuffer<G>,
    texture: ImageTexture<G>,
    uniforms: FilterUniforms<G>,
    state: UniformState,
    surface: SurfaceSize,
}

impl<G: GlBackend> ReadyPipeline<G> {
    unsafe fn build(
        gl: &G,
        vertex: &ShaderSource,
        fragment: &ShaderSource,
        surface: SurfaceSize,
        image: &DecodedImage,
    ) -> Result<Self, EngineError> {
        if surface.width == 0 || surface.height == 0 {
            return Err(EngineError::SurfaceUnavailable(format!(
                "surface has no area ({}x{})",
                surface.width, surface.height
            )));
        }

        let mut program = ShaderProgram::new(gl, vertex, fragment)?;
        program.bind(gl);

        let uniforms = match FilterUniforms::resolve(gl, &program) {
            Ok(u) => u,
            Err(e) => {
                program.destroy(gl);
                return Err(e);
            }
        };

        let mut geometry = match GeometryBuffer::new(gl, &program) {
            Ok(g) => g,
            Err(e) => {
                program.destroy(gl);
                return Err(e);
            }
        };
        geometry.set_position_rectangle(
            gl,
            0.0,
            0.0,
            image.width() as f32,
            image.height() as f32,
        );

        let texture = match ImageTexture::create(gl, image) {
            Ok(t) => t,
            Err(e) => {
                geometry.destroy(gl);
                program.destroy(gl);
                return Err(e);
            }
        };

        let state = UniformState::new(surface.width, surface.height);
        uniforms.set_resolution(gl, state.resolution.0, state.resolution.1);
        uniforms.set_scale(gl, state.scale);
        if let Some(sampler) = &uniforms.image {
            crate::uniforms::UniformRegistry::set_sampler(gl, sampler, IMAGE_TEXTURE_UNIT);
        }

        Ok(Self {
            program,
            geometry,
            texture,
            uniforms,
            state,
            surface,
        })
    }

    unsafe fn draw(&self, gl: &G) {
        gl.viewport(0, 0, self.surface.width as i32, self.surface.height as i32);
        gl.clear_color(0.0, 0.0, 0.0, 0.0);
        gl.clear(glow::COLOR_BUFFER_BIT);

        self.program.bind(gl);
        self.geometry.bind(gl);
        self.texture.bind(gl);
        gl.draw_arrays(glow::TRIANGLES, 0, QUAD_VERTEX_COUNT);
        gl.bind_vertex_array(None);
    }

    unsafe fn destroy(&mut self, gl: &G) {
        self.texture.destroy(gl);
        self.geometry.destroy(gl);
        self.program.destroy(gl);
    }
}

enum PipelineState<G: GlBackend> {
    Uninitialized,
    Ready(Box<ReadyPipeline<G>>),
    Failed,
}

/// Owns every GPU object needed to show one image with a per-channel color filter.
///
/// The GL context is passed to each call and must be current on the calling thread.
pub struct RenderPipeline<G: GlBackend> {
    vertex: ShaderSource,
    fragment: ShaderSource,
    state: PipelineState<G>,
}

impl<G: GlBackend> Default for RenderPipeline<G> {
    fn default() -> Self {
        Self::new()
    }
}

impl<G: GlBackend> RenderPipeline<G> {
    /// A pipeline using the built-in color-filter shaders.
    pub fn new() -> Self {
        Self::with_shaders(
            ShaderSource::vertex(COLOR_FILTER_VERT),
            ShaderSource::fragment(COLOR_FILTER_FRAG),
        )
    }

    /// A pipeline using caller-supplied shaders. They must declare `u_resolution`, `r`, `g`,
    /// `b`, `a`, `a_position` and `a_texCoord`.
    pub fn with_shaders(vertex: ShaderSource, fragment: ShaderSource) -> Self {
        Self {
            vertex,
            fragment,
            state: PipelineState::Uninitialized,
        }
    }

    pub fn status(&self) -> PipelineStatus {
        match self.state {
            PipelineState::Uninitialized => PipelineStatus::Uninitialized,
            PipelineState::Ready(_) => PipelineStatus::Ready,
            PipelineState::Failed => PipelineStatus::Failed,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, PipelineState::Ready(_))
    }

    fn ready(&self, op: &'static str) -> Result<&ReadyPipeline<G>, EngineError> {
        match &self.state {
            PipelineState::Ready(r) => Ok(r),
            _ => Err(EngineError::NotReady {
                op,
                state: self.status().name(),
            }),
        }
    }

    /// Build program, geometry, texture and uniforms for `image`, then draw once.
    ///
    /// On a Ready pipeline the previous image's resources are released first. Any failure
    /// leaves the pipeline `Failed`; nothing is drawn.
    pub unsafe fn initialize(
        &mut self,
        gl: &G,
        surface: SurfaceSize,
        image: &DecodedImage,
    ) -> Result<(), EngineError> {
        if let PipelineState::Failed = self.state {
            return Err(EngineError::NotReady {
                op: "initialize",
                state: PipelineStatus::Failed.name(),
            });
        }
        if let PipelineState::Ready(prev) = &mut self.state {
            tracing::debug!("releasing previous image resources");
            prev.destroy(gl);
        }
        self.state = PipelineState::Uninitialized;

        match ReadyPipeline::build(gl, &self.vertex, &self.fragment, surface, image) {
            Ok(ready) => {
                ready.draw(gl);
                tracing::info!(
                    width = surface.width,
                    height = surface.height,
                    "render pipeline ready"
                );
                self.state = PipelineState::Ready(Box::new(ready));
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "render pipeline initialization failed");
                self.state = PipelineState::Failed;
                Err(e)
            }
        }
    }

    /// Rasterize the quad (6 vertices) with the current uniform values.
    pub unsafe fn draw(&self, gl: &G) -> Result<(), EngineError> {
        let ready = self.ready("draw")?;
        ready.draw(gl);
        Ok(())
    }

    /// Push new red/green/blue scales and redraw. Values are not range-checked.
    pub unsafe fn set_channel_scale(
        &mut self,
        gl: &G,
        r: f32,
        g: f32,
        b: f32,
    ) -> Result<(), EngineError> {
        let status = self.status();
        let PipelineState::Ready(ready) = &mut self.state else {
            return Err(EngineError::NotReady {
                op: "set_channel_scale",
                state: status.name(),
            });
        };

        ready.program.bind(gl);
        ready.uniforms.set_rgb(gl, r, g, b);
        ready.state.scale = ChannelScale {
            r,
            g,
            b,
            a: ready.state.scale.a,
        };
        tracing::debug!(r, g, b, "channel scale updated");
        ready.draw(gl);
        Ok(())
    }

    /// Uniform values the next draw will use.
    pub fn uniform_state(&self) -> Option<&UniformState> {
        match &self.state {
            PipelineState::Ready(r) => Some(&r.state),
            _ => None,
        }
    }

    pub fn surface(&self) -> Option<SurfaceSize> {
        match &self.state {
            PipelineState::Ready(r) => Some(r.surface),
            _ => None,
        }
    }

    /// Position vertices currently uploaded (pixel space).
    pub fn position_vertices(&self) -> Option<[[f32; 2]; 6]> {
        match &self.state {
            PipelineState::Ready(r) => Some(*r.geometry.positions()),
            _ => None,
        }
    }

    /// Read back the surface as an image, top row first.
    pub unsafe fn read_pixels(&self, gl: &G) -> Result<DecodedImage, EngineError> {
        let ready = self.ready("read_pixels")?;
        let (w, h) = (ready.surface.width, ready.surface.height);
        let row = w as usize * 4;
        let mut bottom_up = vec![0u8; row * h as usize];
        gl.read_pixels_rgba8(0, 0, w as i32, h as i32, &mut bottom_up);

        let mut top_down = Vec::with_capacity(bottom_up.len());
        for chunk in bottom_up.chunks_exact(row).rev() {
            top_down.extend_from_slice(chunk);
        }
        DecodedImage::new(w, h, top_down)
    }

    /// Draw the current frame into the back buffer and read it back, top row first.
    ///
    /// Use this after a buffer swap: the back buffer's contents are undefined once presented.
    pub unsafe fn capture(&self, gl: &G) -> Result<DecodedImage, EngineError> {
        self.draw(gl)?;
        self.read_pixels(gl)
    }

    /// Release all GPU objects and return to `Uninitialized` (surface teardown).
    pub unsafe fn destroy(&mut self, gl: &G) {
        if let PipelineState::Ready(ready) = &mut self.state {
            ready.destroy(gl);
        }
        self.state = PipelineState::Uninitialized;
    }
}

impl<G: GlBackend> fmt::Debug for RenderPipeline<G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("RenderPipeline");
        d.field("status", &self.status());
        if let PipelineState::Ready(r) = &self.state {
            d.field("program", &r.program)
                .field("geometry", &r.geometry)
                .field("texture", &r.texture)
                .field("uniforms", &r.uniforms)
                .field("state", &r.state)
                .field("surface", &r.surface);
        }
        d.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::soft::SoftGl;
    use chroma_runtime::{normalize_channel_input, ShaderStage};

    /// 4x4 image with a distinct value in every channel of every pixel.
    fn gradient_4x4() -> DecodedImage {
        let mut rgba = Vec::with_capacity(64);
        for y in 0..4u8 {
            for x in 0..4u8 {
                rgba.extend_from_slice(&[x * 60 + 10, y * 60 + 20, (x + y) * 30 + 5, 255]);
            }
        }
        DecodedImage::new(4, 4, rgba).expect("image")
    }

    fn ready_pipeline(gl: &SoftGl, image: &DecodedImage) -> RenderPipeline<SoftGl> {
        let mut p = RenderPipeline::new();
        unsafe { p.initialize(gl, SurfaceSize::of_image(image), image) }.expect("initialize");
        p
    }

    #[test]
    fn initialize_reaches_ready_and_draws_once() {
        let gl = SoftGl::new();
        let image = gradient_4x4();
        let p = ready_pipeline(&gl, &image);
        assert_eq!(p.status(), PipelineStatus::Ready);
        assert_eq!(gl.draw_call_count(), 1);
        assert_eq!(gl.last_draw(), Some((glow::TRIANGLES, 0, 6)));

        let state = p.uniform_state().expect("state");
        assert_eq!(state.resolution, (4.0, 4.0));
        assert!(state.scale.is_identity());
    }

    #[test]
    fn ready_draw_never_fails() {
        let gl = SoftGl::new();
        let image = gradient_4x4();
        let p = ready_pipeline(&gl, &image);
        for _ in 0..5 {
            unsafe { p.draw(&gl) }.expect("draw in Ready");
        }
        assert_eq!(gl.draw_call_count(), 6);
    }

    #[test]
    fn position_rectangle_covers_image() {
        let gl = SoftGl::new();
        let image = DecodedImage::solid(7, 3, [1, 2, 3, 255]).expect("image");
        let p = ready_pipeline(&gl, &image);
        assert_eq!(
            p.position_vertices(),
            Some([[0.0, 0.0], [7.0, 0.0], [0.0, 3.0], [0.0, 3.0], [7.0, 0.0], [7.0, 3.0]])
        );
    }

    #[test]
    fn identity_render_reproduces_source_texels() {
        let gl = SoftGl::new();
        let image = gradient_4x4();
        let p = ready_pipeline(&gl, &image);
        let out = unsafe { p.read_pixels(&gl) }.expect("readback");
        assert_eq!(out, image);
    }

    #[test]
    fn red_input_scales_only_red() {
        let gl = SoftGl::new();
        let image = gradient_4x4();
        let mut p = ready_pipeline(&gl, &image);

        let red = normalize_channel_input("128");
        unsafe { p.set_channel_scale(&gl, red, 1.0, 1.0) }.expect("set scale");
        assert_eq!(gl.draw_call_count(), 2);

        let out = unsafe { p.read_pixels(&gl) }.expect("readback");
        for y in 0..4 {
            for x in 0..4 {
                let src = image.pixel(x, y).expect("src");
                let got = out.pixel(x, y).expect("out");
                let want_r = (src[0] as f32 / 255.0 * red * 255.0).round() as u8;
                assert_eq!(got[0], want_r, "red at ({x},{y})");
                assert_eq!(&got[1..], &src[1..], "g/b/a at ({x},{y})");
            }
        }
    }

    #[test]
    fn full_intensity_input_is_identity() {
        let gl = SoftGl::new();
        let image = gradient_4x4();
        let mut p = ready_pipeline(&gl, &image);
        let v = normalize_channel_input("255");
        unsafe { p.set_channel_scale(&gl, v, v, v) }.expect("set scale");
        assert_eq!(unsafe { p.read_pixels(&gl) }.expect("readback"), image);
    }

    #[test]
    fn resetting_scale_restores_initial_render() {
        let gl = SoftGl::new();
        let image = gradient_4x4();
        let mut p = ready_pipeline(&gl, &image);
        let initial = unsafe { p.read_pixels(&gl) }.expect("initial");

        unsafe {
            p.set_channel_scale(&gl, 0.0, 0.3, 0.9).expect("a");
            p.set_channel_scale(&gl, 2.0, -1.0, 0.5).expect("b");
            p.set_channel_scale(&gl, 1.0, 1.0, 1.0).expect("reset");
        }
        assert_eq!(unsafe { p.read_pixels(&gl) }.expect("after"), initial);
        assert!(p.uniform_state().expect("state").scale.is_identity());
    }

    #[test]
    fn out_of_range_scales_clamp_in_output() {
        let gl = SoftGl::new();
        let image = DecodedImage::solid(2, 2, [100, 100, 100, 255]).expect("image");
        let mut p = ready_pipeline(&gl, &image);
        unsafe { p.set_channel_scale(&gl, 4.0, -2.0, 1.0) }.expect("accepted");
        let out = unsafe { p.read_pixels(&gl) }.expect("readback");
        assert_eq!(out.pixel(0, 0), Some([255, 0, 100, 255]));
        assert_eq!(p.uniform_state().expect("state").scale.r, 4.0);
    }

    #[test]
    fn malformed_fragment_shader_fails_initialization() {
        let gl = SoftGl::new();
        let image = gradient_4x4();
        let mut p = RenderPipeline::<SoftGl>::with_shaders(
            ShaderSource::vertex(COLOR_FILTER_VERT),
            ShaderSource::fragment("void main() { o = texture(u_image, v_texCoord; }"),
        );
        let err = unsafe { p.initialize(&gl, SurfaceSize::of_image(&image), &image) }
            .expect_err("fragment is malformed");
        assert!(matches!(
            err,
            EngineError::ShaderCompile {
                stage: ShaderStage::Fragment,
                ..
            }
        ));
        assert!(!p.is_ready());
        assert_eq!(gl.draw_call_count(), 0);

        let err = unsafe { p.draw(&gl) }.expect_err("draw must be rejected");
        assert!(matches!(err, EngineError::NotReady { op: "draw", .. }));
        assert!(unsafe { p.set_channel_scale(&gl, 1.0, 1.0, 1.0) }.is_err());
        assert_eq!(gl.draw_call_count(), 0);
    }

    fn assert_fragment_rejected(frag: &str) {
        let gl = SoftGl::new();
        let image = gradient_4x4();
        let mut p = RenderPipeline::<SoftGl>::with_shaders(
            ShaderSource::vertex(COLOR_FILTER_VERT),
            ShaderSource::fragment(frag),
        );
        let err = unsafe { p.initialize(&gl, SurfaceSize::of_image(&image), &image) }
            .expect_err("fragment is malformed");
        match err {
            EngineError::ShaderCompile {
                stage: ShaderStage::Fragment,
                log,
            } => assert!(log.contains("error"), "log: {log}"),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(p.status(), PipelineStatus::Failed);
        assert_eq!(gl.draw_call_count(), 0);
        assert_eq!(gl.live_shader_count(), 0);
    }

    #[test]
    fn fragment_missing_semicolon_fails_initialization() {
        assert_fragment_rejected(
            &COLOR_FILTER_FRAG.replace("vec4(r, g, b, a);", "vec4(r, g, b, a)"),
        );
    }

    #[test]
    fn fragment_undeclared_identifier_fails_initialization() {
        assert_fragment_rejected(
            &COLOR_FILTER_FRAG.replace("vec4(r, g, b, a)", "vec4(r, g, b, brightness)"),
        );
    }

    #[test]
    fn fragment_type_mismatch_fails_initialization() {
        assert_fragment_rejected(
            &COLOR_FILTER_FRAG.replace("vec4(r, g, b, a)", "vec3(r, g, b)"),
        );
    }

    #[test]
    fn output_follows_the_fragment_shader() {
        let gl = SoftGl::new();
        let image = DecodedImage::solid(2, 2, [5, 200, 0, 255]).expect("image");
        let frag = COLOR_FILTER_FRAG.replace("vec4(r, g, b, a)", "vec4(g, r, b, a)");
        let mut p = RenderPipeline::<SoftGl>::with_shaders(
            ShaderSource::vertex(COLOR_FILTER_VERT),
            ShaderSource::fragment(frag),
        );
        unsafe { p.initialize(&gl, SurfaceSize::of_image(&image), &image) }.expect("initialize");

        // r = 0 now scales green, g = 1 scales red.
        unsafe { p.set_channel_scale(&gl, 0.0, 1.0, 1.0) }.expect("set scale");
        let out = unsafe { p.read_pixels(&gl) }.expect("readback");
        assert_eq!(out.pixel(1, 1), Some([5, 0, 0, 255]));
    }

    #[test]
    fn swizzled_texel_reorders_channels() {
        let gl = SoftGl::new();
        let image = DecodedImage::solid(2, 2, [5, 200, 0, 255]).expect("image");
        let frag = COLOR_FILTER_FRAG.replace(
            "texture(u_image, v_texCoord)",
            "texture(u_image, v_texCoord).grba",
        );
        let mut p = RenderPipeline::<SoftGl>::with_shaders(
            ShaderSource::vertex(COLOR_FILTER_VERT),
            ShaderSource::fragment(frag),
        );
        unsafe { p.initialize(&gl, SurfaceSize::of_image(&image), &image) }.expect("initialize");
        let out = unsafe { p.read_pixels(&gl) }.expect("readback");
        assert_eq!(out.pixel(0, 0), Some([200, 5, 0, 255]));
    }

    #[test]
    fn capture_redraws_before_reading() {
        let gl = SoftGl::new();
        let image = gradient_4x4();
        let p = ready_pipeline(&gl, &image);

        // What a presented back buffer may hold.
        unsafe {
            gl.clear_color(1.0, 1.0, 1.0, 1.0);
            gl.clear(glow::COLOR_BUFFER_BIT);
        }
        let stale = unsafe { p.read_pixels(&gl) }.expect("readback");
        assert_eq!(stale.pixel(0, 0), Some([255, 255, 255, 255]));

        let frame = unsafe { p.capture(&gl) }.expect("capture");
        assert_eq!(frame, image);
        assert_eq!(gl.draw_call_count(), 2);
    }

    #[test]
    fn capture_needs_a_ready_pipeline() {
        let gl = SoftGl::new();
        let p = RenderPipeline::<SoftGl>::new();
        let err = unsafe { p.capture(&gl) }.expect_err("uninitialized");
        assert!(matches!(err, EngineError::NotReady { op: "draw", .. }));
    }

    #[test]
    fn missing_resolution_uniform_is_fatal() {
        let gl = SoftGl::new();
        let image = gradient_4x4();
        let vert = COLOR_FILTER_VERT
            .replace("uniform vec2 u_resolution;\n", "")
            .replace("a_position / u_resolution", "a_position / vec2(4.0, 4.0)");
        let mut p = RenderPipeline::<SoftGl>::with_shaders(
            ShaderSource::vertex(vert),
            ShaderSource::fragment(COLOR_FILTER_FRAG),
        );
        let err = unsafe { p.initialize(&gl, SurfaceSize::of_image(&image), &image) }
            .expect_err("u_resolution missing");
        match err {
            EngineError::UniformResolution(names) => assert_eq!(names, ["u_resolution"]),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(p.status(), PipelineStatus::Failed);
        assert_eq!(gl.live_program_count(), 0);
    }

    #[test]
    fn failed_pipeline_stays_failed_until_destroyed() {
        let gl = SoftGl::new();
        let image = gradient_4x4();
        let mut p = RenderPipeline::<SoftGl>::with_shaders(
            ShaderSource::vertex("garbage {"),
            ShaderSource::fragment(COLOR_FILTER_FRAG),
        );
        let surface = SurfaceSize::of_image(&image);
        assert!(unsafe { p.initialize(&gl, surface, &image) }.is_err());
        let err = unsafe { p.initialize(&gl, surface, &image) }.expect_err("terminal");
        assert!(matches!(err, EngineError::NotReady { state: "failed", .. }));

        unsafe { p.destroy(&gl) };
        assert_eq!(p.status(), PipelineStatus::Uninitialized);
    }

    #[test]
    fn draw_before_initialize_is_rejected() {
        let gl = SoftGl::new();
        let p = RenderPipeline::<SoftGl>::new();
        let err = unsafe { p.draw(&gl) }.expect_err("uninitialized");
        assert_eq!(err.to_string(), "draw rejected: pipeline is uninitialized");
    }

    #[test]
    fn reinitialize_releases_previous_image() {
        let gl = SoftGl::new();
        let first = gradient_4x4();
        let second = DecodedImage::solid(2, 3, [9, 8, 7, 255]).expect("image");
        let mut p = ready_pipeline(&gl, &first);
        unsafe { p.initialize(&gl, SurfaceSize::of_image(&second), &second) }.expect("reload");

        assert_eq!(gl.live_texture_count(), 1);
        assert_eq!(gl.live_program_count(), 1);
        assert_eq!(gl.live_buffer_count(), 2);
        assert_eq!(p.surface(), Some(SurfaceSize::new(2, 3)));
        assert_eq!(unsafe { p.read_pixels(&gl) }.expect("readback"), second);
    }

    #[test]
    fn destroy_releases_everything() {
        let gl = SoftGl::new();
        let image = gradient_4x4();
        let mut p = ready_pipeline(&gl, &image);
        unsafe { p.destroy(&gl) };
        assert_eq!(p.status(), PipelineStatus::Uninitialized);
        assert_eq!(gl.live_texture_count(), 0);
        assert_eq!(gl.live_program_count(), 0);
        assert_eq!(gl.live_buffer_count(), 0);
        assert_eq!(gl.live_vertex_array_count(), 0);
    }

    #[test]
    fn object_allocation_failure_is_reported() {
        let gl = SoftGl::new();
        let image = gradient_4x4();
        // Two shaders fit, the program does not.
        gl.set_object_limit(Some(2));
        let mut p = RenderPipeline::<SoftGl>::new();
        let err = unsafe { p.initialize(&gl, SurfaceSize::of_image(&image), &image) }
            .expect_err("out of objects");
        assert!(matches!(err, EngineError::GlCreate(_)));
        assert_eq!(p.status(), PipelineStatus::Failed);
    }

    #[test]
    fn zero_area_surface_is_unavailable() {
        let gl = SoftGl::new();
        let image = gradient_4x4();
        let mut p = RenderPipeline::<SoftGl>::new();
        let err = unsafe { p.initialize(&gl, SurfaceSize::new(0, 4), &image) }
            .expect_err("no area");
        assert!(matches!(err, EngineError::SurfaceUnavailable(_)));
    }
}
