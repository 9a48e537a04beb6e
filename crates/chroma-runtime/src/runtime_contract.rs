//! Names and fixed geometry shared by every backend.
//!
//! Adding new uniforms is additive; renaming or removing one is breaking for shader authors.

/// Pixel-space resolution of the surface (vec2).
pub const U_RESOLUTION: &str = "u_resolution";
/// Per-channel scale factors (float each).
pub const U_RED: &str = "r";
pub const U_GREEN: &str = "g";
pub const U_BLUE: &str = "b";
pub const U_ALPHA: &str = "a";
/// Image sampler. Optional: samplers default to unit 0.
pub const U_IMAGE: &str = "u_image";

/// Uniforms whose absence aborts initialization.
pub const REQUIRED_UNIFORMS: [&str; 5] = [U_RESOLUTION, U_RED, U_GREEN, U_BLUE, U_ALPHA];

pub const A_POSITION: &str = "a_position";
pub const A_TEX_COORD: &str = "a_texCoord";

/// Vertices per draw: two triangles.
pub const QUAD_VERTEX_COUNT: i32 = 6;

/// Texture coordinates of the unit quad, as two triangles.
///
/// Invariant across images: always covers [0,1]x[0,1] in the same winding.
pub const TEX_COORD_QUAD: [[f32; 2]; 6] = [
    [0.0, 0.0],
    [1.0, 0.0],
    [0.0, 1.0],
    [0.0, 1.0],
    [1.0, 0.0],
    [1.0, 1.0],
];

/// Corners of the rectangle at (x, y) with the given size, in the same two-triangle order
/// as [`TEX_COORD_QUAD`].
pub fn rectangle_vertices(x: f32, y: f32, width: f32, height: f32) -> [[f32; 2]; 6] {
    let x1 = x;
    let x2 = x + width;
    let y1 = y;
    let y2 = y + height;
    [[x1, y1], [x2, y1], [x1, y2], [x1, y2], [x2, y1], [x2, y2]]
}

/// Flatten vertex pairs into the interleaved float layout a vertex buffer expects.
pub fn flatten_pairs(pairs: &[[f32; 2]]) -> Vec<f32> {
    pairs.iter().flat_map(|p| [p[0], p[1]]).collect()
}
