//! The GL surface the pipeline talks to.
//!
//! `GlBackend` mirrors the subset of `glow::HasContext` the color-filter pipeline issues,
//! with the same names and argument order. It is implemented for `glow::Context` (real
//! driver) and for [`crate::soft::SoftGl`] (CPU reference, headless).
//!
//! All methods are `unsafe` for the same reason glow's are: the caller guarantees the
//! context is current on this thread and that handles belong to it.

use std::fmt;

use glow::HasContext;

pub trait GlBackend {
    type Shader: Copy + fmt::Debug;
    type Program: Copy + fmt::Debug;
    type Buffer: Copy + fmt::Debug;
    type VertexArray: Copy + fmt::Debug;
    type Texture: Copy + fmt::Debug;
    type UniformLocation: Clone + fmt::Debug;

    // ---- shaders / programs ----
    unsafe fn create_shader(&self, shader_type: u32) -> Result<Self::Shader, String>;
    unsafe fn shader_source(&self, shader: Self::Shader, source: &str);
    unsafe fn compile_shader(&self, shader: Self::Shader);
    unsafe fn get_shader_compile_status(&self, shader: Self::Shader) -> bool;
    unsafe fn get_shader_info_log(&self, shader: Self::Shader) -> String;
    unsafe fn delete_shader(&self, shader: Self::Shader);

    unsafe fn create_program(&self) -> Result<Self::Program, String>;
    unsafe fn attach_shader(&self, program: Self::Program, shader: Self::Shader);
    unsafe fn detach_shader(&self, program: Self::Program, shader: Self::Shader);
    unsafe fn link_program(&self, program: Self::Program);
    unsafe fn get_program_link_status(&self, program: Self::Program) -> bool;
    unsafe fn get_program_info_log(&self, program: Self::Program) -> String;
    unsafe fn use_program(&self, program: Option<Self::Program>);
    unsafe fn delete_program(&self, program: Self::Program);

    unsafe fn get_attrib_location(&self, program: Self::Program, name: &str) -> Option<u32>;
    unsafe fn get_uniform_location(
        &self,
        program: Self::Program,
        name: &str,
    ) -> Option<Self::UniformLocation>;

    // ---- vertex state ----
    unsafe fn create_vertex_array(&self) -> Result<Self::VertexArray, String>;
    unsafe fn bind_vertex_array(&self, vertex_array: Option<Self::VertexArray>);
    unsafe fn delete_vertex_array(&self, vertex_array: Self::VertexArray);

    unsafe fn create_buffer(&self) -> Result<Self::Buffer, String>;
    unsafe fn bind_buffer(&self, target: u32, buffer: Option<Self::Buffer>);
    unsafe fn buffer_data_u8_slice(&self, target: u32, data: &[u8], usage: u32);
    unsafe fn delete_buffer(&self, buffer: Self::Buffer);

    unsafe fn enable_vertex_attrib_array(&self, index: u32);
    unsafe fn vertex_attrib_pointer_f32(
        &self,
        index: u32,
        size: i32,
        data_type: u32,
        normalized: bool,
        stride: i32,
        offset: i32,
    );

    // ---- textures ----
    unsafe fn create_texture(&self) -> Result<Self::Texture, String>;
    unsafe fn active_texture(&self, unit: u32);
    unsafe fn bind_texture(&self, target: u32, texture: Option<Self::Texture>);
    unsafe fn tex_parameter_i32(&self, target: u32, parameter: u32, value: i32);
    unsafe fn pixel_store_i32(&self, parameter: u32, value: i32);
    #[allow(clippy::too_many_arguments)]
    unsafe fn tex_image_2d(
        &self,
        target: u32,
        level: i32,
        internal_format: i32,
        width: i32,
        height: i32,
        border: i32,
        format: u32,
        ty: u32,
        pixels: Option<&[u8]>,
    );
    unsafe fn delete_texture(&self, texture: Self::Texture);

    // ---- uniforms ----
    unsafe fn uniform_1_i32(&self, location: Option<&Self::UniformLocation>, x: i32);
    unsafe fn uniform_1_f32(&self, location: Option<&Self::UniformLocation>, x: f32);
    unsafe fn uniform_2_f32(&self, location: Option<&Self::UniformLocation>, x: f32, y: f32);

    // ---- framebuffer ----
    unsafe fn viewport(&self, x: i32, y: i32, width: i32, height: i32);
    unsafe fn clear_color(&self, red: f32, green: f32, blue: f32, alpha: f32);
    unsafe fn clear(&self, mask: u32);
    unsafe fn draw_arrays(&self, mode: u32, first: i32, count: i32);

    /// Read an RGBA8 region of the bound framebuffer into `out`, bottom row first.
    unsafe fn read_pixels_rgba8(&self, x: i32, y: i32, width: i32, height: i32, out: &mut [u8]);
}

impl GlBackend for glow::Context {
    type Shader = <glow::Context as HasContext>::Shader;
    type Program = <glow::Context as HasContext>::Program;
    type Buffer = <glow::Context as HasContext>::Buffer;
    type VertexArray = <glow::Context as HasContext>::VertexArray;
    type Texture = <glow::Context as HasContext>::Texture;
    type UniformLocation = <glow::Context as HasContext>::UniformLocation;

    unsafe fn create_shader(&self, shader_type: u32) -> Result<Self::Shader, String> {
        HasContext::create_shader(self, shader_type)
    }

    unsafe fn shader_source(&self, shader: Self::Shader, source: &str) {
        HasContext::shader_source(self, shader, source)
    }

    unsafe fn compile_shader(&self, shader: Self::Shader) {
        HasContext::compile_shader(self, shader)
    }

    unsafe fn get_shader_compile_status(&self, shader: Self::Shader) -> bool {
        HasContext::get_shader_compile_status(self, shader)
    }

    unsafe fn get_shader_info_log(&self, shader: Self::Shader) -> String {
        HasContext::get_shader_info_log(self, shader)
    }

    unsafe fn delete_shader(&self, shader: Self::Shader) {
        HasContext::delete_shader(self, shader)
    }

    unsafe fn create_program(&self) -> Result<Self::Program, String> {
        HasContext::create_program(self)
    }

    unsafe fn attach_shader(&self, program: Self::Program, shader: Self::Shader) {
        HasContext::attach_shader(self, program, shader)
    }

    unsafe fn detach_shader(&self, program: Self::Program, shader: Self::Shader) {
        HasContext::detach_shader(self, program, shader)
    }

    unsafe fn link_program(&self, program: Self::Program) {
        HasContext::link_program(self, program)
    }

    unsafe fn get_program_link_status(&self, program: Self::Program) -> bool {
        HasContext::get_program_link_status(self, program)
    }

    unsafe fn get_program_info_log(&self, program: Self::Program) -> String {
        HasContext::get_program_info_log(self, program)
    }

    unsafe fn use_program(&self, program: Option<Self::Program>) {
        HasContext::use_program(self, program)
    }

    unsafe fn delete_program(&self, program: Self::Program) {
        HasContext::delete_program(self, program)
    }

    unsafe fn get_attrib_location(&self, program: Self::Program, name: &str) -> Option<u32> {
        HasContext::get_attrib_location(self, program, name)
    }

    unsafe fn get_uniform_location(
        &self,
        program: Self::Program,
        name: &str,
    ) -> Option<Self::UniformLocation> {
        HasContext::get_uniform_location(self, program, name)
    }

    unsafe fn create_vertex_array(&self) -> Result<Self::VertexArray, String> {
        HasContext::create_vertex_array(self)
    }

    unsafe fn bind_vertex_array(&self, vertex_array: Option<Self::VertexArray>) {
        HasContext::bind_vertex_array(self, vertex_array)
    }

    unsafe fn delete_vertex_array(&self, vertex_array: Self::VertexArray) {
        HasContext::delete_vertex_array(self, vertex_array)
    }

    unsafe fn create_buffer(&self) -> Result<Self::Buffer, String> {
        HasContext::create_buffer(self)
    }

    unsafe fn bind_buffer(&self, target: u32, buffer: Option<Self::Buffer>) {
        HasContext::bind_buffer(self, target, buffer)
    }

    unsafe fn buffer_data_u8_slice(&self, target: u32, data: &[u8], usage: u32) {
        HasContext::buffer_data_u8_slice(self, target, data, usage)
    }

    unsafe fn delete_buffer(&self, buffer: Self::Buffer) {
        HasContext::delete_buffer(self, buffer)
    }

    unsafe fn enable_vertex_attrib_array(&self, index: u32) {
        HasContext::enable_vertex_attrib_array(self, index)
    }

    unsafe fn vertex_attrib_pointer_f32(
        &self,
        index: u32,
        size: i32,
        data_type: u32,
        normalized: bool,
        stride: i32,
        offset: i32,
    ) {
        HasContext::vertex_attrib_pointer_f32(
            self, index, size, data_type, normalized, stride, offset,
        )
    }

    unsafe fn create_texture(&self) -> Result<Self::Texture, String> {
        HasContext::create_texture(self)
    }

    unsafe fn active_texture(&self, unit: u32) {
        HasContext::active_texture(self, unit)
    }

    unsafe fn bind_texture(&self, target: u32, texture: Option<Self::Texture>) {
        HasContext::bind_texture(self, target, texture)
    }

    unsafe fn tex_parameter_i32(&self, target: u32, parameter: u32, value: i32) {
        HasContext::tex_parameter_i32(self, target, parameter, value)
    }

    unsafe fn pixel_store_i32(&self, parameter: u32, value: i32) {
        HasContext::pixel_store_i32(self, parameter, value)
    }

    unsafe fn tex_image_2d(
        &self,
        target: u32,
        level: i32,
        internal_format: i32,
        width: i32,
        height: i32,
        border: i32,
        format: u32,
        ty: u32,
        pixels: Option<&[u8]>,
    ) {
        HasContext::tex_image_2d(
            self,
            target,
            level,
            internal_format,
            width,
            height,
            border,
            format,
            ty,
            pixels,
        )
    }

    unsafe fn delete_texture(&self, texture: Self::Texture) {
        HasContext::delete_texture(self, texture)
    }

    unsafe fn uniform_1_i32(&self, location: Option<&Self::UniformLocation>, x: i32) {
        HasContext::uniform_1_i32(self, location, x)
    }

    unsafe fn uniform_1_f32(&self, location: Option<&Self::UniformLocation>, x: f32) {
        HasContext::uniform_1_f32(self, location, x)
    }

    unsafe fn uniform_2_f32(&self, location: Option<&Self::UniformLocation>, x: f32, y: f32) {
        HasContext::uniform_2_f32(self, location, x, y)
    }

    unsafe fn viewport(&self, x: i32, y: i32, width: i32, height: i32) {
        HasContext::viewport(self, x, y, width, height)
    }

    unsafe fn clear_color(&self, red: f32, green: f32, blue: f32, alpha: f32) {
        HasContext::clear_color(self, red, green, blue, alpha)
    }

    unsafe fn clear(&self, mask: u32) {
        HasContext::clear(self, mask)
    }

    unsafe fn draw_arrays(&self, mode: u32, first: i32, count: i32) {
        HasContext::draw_arrays(self, mode, first, count)
    }

    unsafe fn read_pixels_rgba8(&self, x: i32, y: i32, width: i32, height: i32, out: &mut [u8]) {
        HasContext::read_pixels(
            self,
            x,
            y,
            width,
            height,
            glow::RGBA,
            glow::UNSIGNED_BYTE,
            glow::PixelPackData::Slice(out),
        )
    }
}
