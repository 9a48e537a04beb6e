use crate::EngineError;

/// A decoded raster image: tightly packed RGBA8, row-major, first row at the top.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    width: u32,
    height: u32,
    rgba: Vec<u8>,
}

impl DecodedImage {
    /// Wrap an RGBA8 buffer. Rejects empty images and buffers whose length is not `w * h * 4`.
    pub fn new(width: u32, height: u32, rgba: Vec<u8>) -> Result<Self, EngineError> {
        if width == 0 || height == 0 {
            return Err(EngineError::InvalidImage(format!(
                "image must not be empty (got {width}x{height})"
            )));
        }
        let expected = width as usize * height as usize * 4;
        if rgba.len() != expected {
            return Err(EngineError::InvalidImage(format!(
                "expected {expected} bytes for {width}x{height} RGBA, got {}",
                rgba.len()
            )));
        }
        Ok(Self {
            width,
            height,
            rgba,
        })
    }

    /// Single-color image, handy for tests and placeholders.
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Result<Self, EngineError> {
        let n = width as usize * height as usize;
        let mut buf = Vec::with_capacity(n * 4);
        for _ in 0..n {
            buf.extend_from_slice(&rgba);
        }
        Self::new(width, height, buf)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn rgba(&self) -> &[u8] {
        &self.rgba
    }

    /// RGBA of pixel (x, y), with y counted from the top row.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = ((y * self.width + x) * 4) as usize;
        let px = &self.rgba[i..i + 4];
        Some([px[0], px[1], px[2], px[3]])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_length_mismatch() {
        let err = DecodedImage::new(2, 2, vec![0; 15]).expect_err("short buffer");
        assert!(err.to_string().contains("expected 16 bytes"), "got: {err}");
    }

    #[test]
    fn rejects_zero_size() {
        assert!(DecodedImage::new(0, 4, Vec::new()).is_err());
    }

    #[test]
    fn pixel_indexes_from_top_row() {
        let mut buf = vec![0u8; 2 * 2 * 4];
        buf[8..12].copy_from_slice(&[1, 2, 3, 4]); // (0, 1)
        let img = DecodedImage::new(2, 2, buf).expect("valid image");
        assert_eq!(img.pixel(0, 1), Some([1, 2, 3, 4]));
        assert_eq!(img.pixel(2, 0), None);
    }
}
