use std::fmt;

use chroma_core::DecodedImage;
use chroma_runtime::EngineError;

use crate::backend::GlBackend;

/// Texture unit the image stays bound to for the lifetime of a pipeline.
pub const IMAGE_TEXTURE_UNIT: u32 = 0;

/// GPU copy of a decoded image: clamp-to-edge, nearest filtering, no mipmaps.
pub struct ImageTexture<G: GlBackend> {
    pub tex: G::Texture,
    pub w: i32,
    pub h: i32,
}

impl<G: GlBackend> ImageTexture<G> {
    /// Allocate a 2D texture, configure sampling and upload `image` as level 0.
    pub unsafe fn create(gl: &G, image: &DecodedImage) -> Result<Self, EngineError> {
        let w = i32::try_from(image.width())
            .map_err(|_| EngineError::InvalidImage(format!("width {} too large", image.width())))?;
        let h = i32::try_from(image.height()).map_err(|_| {
            EngineError::InvalidImage(format!("height {} too large", image.height()))
        })?;

        let tex = gl
            .create_texture()
            .map_err(|e| EngineError::GlCreate(format!("create_texture failed: {e}")))?;

        gl.active_texture(glow::TEXTURE0 + IMAGE_TEXTURE_UNIT);
        gl.bind_texture(glow::TEXTURE_2D, Some(tex));

        // Any size renders: no wrapping, exact texels.
        gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_WRAP_S, glow::CLAMP_TO_EDGE as i32);
        gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_WRAP_T, glow::CLAMP_TO_EDGE as i32);
        gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MIN_FILTER, glow::NEAREST as i32);
        gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MAG_FILTER, glow::NEAREST as i32);

        // Rows are tightly packed RGBA8.
        gl.pixel_store_i32(glow::UNPACK_ALIGNMENT, 1);
        gl.tex_image_2d(
            glow::TEXTURE_2D,
            0,
            glow::RGBA8 as i32,
            w,
            h,
            0,
            glow::RGBA,
            glow::UNSIGNED_BYTE,
            Some(image.rgba()),
        );

        tracing::debug!(w, h, "image texture uploaded");
        Ok(Self { tex, w, h })
    }

    pub unsafe fn bind(&self, gl: &G) {
        gl.active_texture(glow::TEXTURE0 + IMAGE_TEXTURE_UNIT);
        gl.bind_texture(glow::TEXTURE_2D, Some(self.tex));
    }

    pub unsafe fn destroy(&mut self, gl: &G) {
        gl.bind_texture(glow::TEXTURE_2D, None);
        gl.delete_texture(self.tex);
    }
}

impl<G: GlBackend> fmt::Debug for ImageTexture<G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageTexture")
            .field("tex", &self.tex)
            .field("w", &self.w)
            .field("h", &self.h)
            .finish()
    }
}
