//! Embedded GLSL for the color-filter program.
//!
//! The vertex stage takes positions in pixels and maps them to clip space using
//! `u_resolution`, flipping y so that pixel row 0 is the top of the surface.

pub const COLOR_FILTER_VERT: &str = r#"#version 330 core
in vec2 a_position;
in vec2 a_texCoord;

uniform vec2 u_resolution;

out vec2 v_texCoord;

void main() {
    vec2 zeroToOne = a_position / u_resolution;
    vec2 clipSpace = zeroToOne * 2.0 - 1.0;
    gl_Position = vec4(clipSpace * vec2(1.0, -1.0), 0.0, 1.0);
    v_texCoord = a_texCoord;
}
"#;

pub const COLOR_FILTER_FRAG: &str = r#"#version 330 core
in vec2 v_texCoord;
out vec4 o;

uniform sampler2D u_image;
uniform float r;
uniform float g;
uniform float b;
uniform float a;

void main() {
    o = texture(u_image, v_texCoord) * vec4(r, g, b, a);
}
"#;
