#![forbid(unsafe_code)]

//! Backend-agnostic runtime contract.
//!
//! This crate defines the parameter blocks, shader-facing names and input normalization that
//! backends (`chroma-runtime-glow`) and input layers (`chroma-controls`) agree on.
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(missing_debug_implementations)]

pub use chroma_core::{EngineError, ShaderStage};

pub mod runtime_contract;

// -------------------------------------------------------------------------------------------------
// Shader sources
// -------------------------------------------------------------------------------------------------

/// One stage's GLSL text. Immutable once handed to the builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderSource {
    pub stage: ShaderStage,
    pub text: String,
}

impl ShaderSource {
    pub fn vertex(text: impl Into<String>) -> Self {
        Self {
            stage: ShaderStage::Vertex,
            text: text.into(),
        }
    }

    pub fn fragment(text: impl Into<String>) -> Self {
        Self {
            stage: ShaderStage::Fragment,
            text: text.into(),
        }
    }
}

// -------------------------------------------------------------------------------------------------
// Parameter blocks
// -------------------------------------------------------------------------------------------------

/// Per-channel multipliers applied to every sampled texel.
///
/// Values are nominally in [0,1]; anything else is passed through and left to the
/// hardware's output clamp.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChannelScale {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl ChannelScale {
    /// Leaves the image unmodified.
    pub const IDENTITY: ChannelScale = ChannelScale {
        r: 1.0,
        g: 1.0,
        b: 1.0,
        a: 1.0,
    };

    pub fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b, a: 1.0 }
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }
}

impl Default for ChannelScale {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Everything that may change between draws.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct UniformState {
    /// Surface size in pixels.
    pub resolution: (f32, f32),
    pub scale: ChannelScale,
}

impl UniformState {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            resolution: (width as f32, height as f32),
            scale: ChannelScale::IDENTITY,
        }
    }
}

// -------------------------------------------------------------------------------------------------
// Filter input normalization
// -------------------------------------------------------------------------------------------------

/// Map an integer filter intensity onto a channel scale: `(v mod 256) / 255`.
///
/// The modulus is Euclidean so negative input still lands in [0,1].
pub fn normalize_channel_value(v: i64) -> f32 {
    v.rem_euclid(256) as f32 / 255.0
}

/// Parse raw text the way a numeric input box reads it, then normalize.
///
/// Leading whitespace and an optional sign are accepted, then the longest run of decimal
/// digits; trailing garbage is ignored. Text with no leading digits maps to 0.
pub fn normalize_channel_input(raw: &str) -> f32 {
    match parse_leading_int_mod256(raw) {
        Some(v) => normalize_channel_value(v),
        None => 0.0,
    }
}

/// Leading integer of `raw`, reduced mod 256 while parsing so arbitrarily long input is exact.
fn parse_leading_int_mod256(raw: &str) -> Option<i64> {
    let s = raw.trim_start();
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };

    let mut acc: i64 = 0;
    let mut seen = false;
    for ch in digits.chars() {
        let Some(d) = ch.to_digit(10) else { break };
        acc = (acc * 10 + d as i64) % 256;
        seen = true;
    }

    if !seen {
        return None;
    }
    Some(if negative { -acc } else { acc })
}

// -------------------------------------------------------------------------------------------------
// Redraw seam
// -------------------------------------------------------------------------------------------------

/// Receiver of new channel scales. Implementations push them to the GPU and redraw.
pub trait ChannelScaleSink {
    fn apply_channel_scale(&mut self, scale: ChannelScale) -> Result<(), EngineError>;
}

/// Records every scale it receives. Useful for hosts without a surface and for tests.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub applied: Vec<ChannelScale>,
}

impl ChannelScaleSink for RecordingSink {
    fn apply_channel_scale(&mut self, scale: ChannelScale) -> Result<(), EngineError> {
        self.applied.push(scale);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn normalization_law_holds_on_range() {
        for v in -1024i64..=1024 {
            let n = normalize_channel_value(v);
            assert!((0.0..=1.0).contains(&n), "v={v} -> {n}");
            assert!(approx(n, (v.rem_euclid(256)) as f32 / 255.0));
        }
    }

    #[test]
    fn full_intensity_is_one_and_wraps_at_256() {
        assert!(approx(normalize_channel_value(255), 1.0));
        assert!(approx(normalize_channel_value(256), 0.0));
        assert!(approx(normalize_channel_value(257), 1.0 / 255.0));
    }

    #[test]
    fn non_numeric_input_is_zero() {
        assert_eq!(normalize_channel_input(""), 0.0);
        assert_eq!(normalize_channel_input("abc"), 0.0);
        assert_eq!(normalize_channel_input("-"), 0.0);
        assert_eq!(normalize_channel_input("  x12"), 0.0);
    }

    #[test]
    fn parses_leading_digits_like_an_input_box() {
        assert!(approx(normalize_channel_input("128"), 128.0 / 255.0));
        assert!(approx(normalize_channel_input("  64px"), 64.0 / 255.0));
        assert!(approx(normalize_channel_input("+10"), 10.0 / 255.0));
        assert!(approx(normalize_channel_input("-1"), 1.0));
    }

    #[test]
    fn very_long_input_is_reduced_exactly() {
        // 10^30 mod 256 == 0 because 2^8 divides 10^30.
        let raw = format!("1{}", "0".repeat(30));
        assert_eq!(normalize_channel_input(&raw), 0.0);
    }

    #[test]
    fn uniform_state_starts_at_identity() {
        let u = UniformState::new(4, 3);
        assert_eq!(u.resolution, (4.0, 3.0));
        assert!(u.scale.is_identity());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn channel_scale_serializes() {
        let json = serde_json::to_string(&ChannelScale::rgb(0.5, 1.0, 0.0)).expect("json");
        assert!(json.contains("\"r\":0.5"), "got: {json}");
    }
}
