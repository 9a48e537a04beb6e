//! Host glue (policy layer).
//!
//! Creates a winit window sized to the image plus a current GL 3.3 core context and a
//! glow loader. It stays separate so the runtime can remain embed-friendly.

use std::ffi::CString;
use std::fmt;
use std::num::NonZeroU32;

use chroma_core::EngineError;
use glutin::context::{ContextApi, ContextAttributesBuilder, GlProfile, PossiblyCurrentContext, Version};
use glutin::display::GetGlDisplay;
use glutin::prelude::*;
use glutin::surface::{Surface, SurfaceAttributesBuilder, WindowSurface};
use winit::event_loop::EventLoop;
use winit::window::{Window, WindowBuilder};

// raw-window-handle 0.5 traits (matches glutin 0.30)
use raw_window_handle::HasRawWindowHandle;

/// Shown instead of the image when no usable GL context can be created.
pub const SURFACE_UNAVAILABLE_MESSAGE: &str =
    "Unable to start the renderer: this viewer needs OpenGL 3.3. \
     Please run it on a machine and display that support it.";

/// Window parameters. The inner size is in physical pixels so one texel maps to one pixel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowSpec {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl WindowSpec {
    pub fn new(title: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            title: title.into(),
            width,
            height,
        }
    }
}

/// A window with a current GL context on this thread.
pub struct GlWindow {
    pub window: Window,
    pub surface: Surface<WindowSurface>,
    pub context: PossiblyCurrentContext,
    pub gl: glow::Context,
}

impl fmt::Debug for GlWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // glutin surface/context handles are opaque OS resources.
        f.debug_struct("GlWindow")
            .field("window", &self.window.id())
            .field("size", &self.size())
            .field("gl", &"<glow context>")
            .finish()
    }
}

fn unavailable(what: &str, e: impl fmt::Display) -> EngineError {
    EngineError::SurfaceUnavailable(format!("{what}: {e}"))
}

fn non_zero(v: u32) -> NonZeroU32 {
    NonZeroU32::new(v).unwrap_or(NonZeroU32::MIN)
}

/// Create the window, pick a config, and make a GL 3.3 core context current.
///
/// Every failure maps to `EngineError::SurfaceUnavailable`.
pub fn make_gl(event_loop: &EventLoop<()>, requested: &WindowSpec) -> Result<GlWindow, EngineError> {
    let window_builder = WindowBuilder::new()
        .with_title(requested.title.clone())
        .with_resizable(false)
        .with_inner_size(winit::dpi::PhysicalSize::new(requested.width.max(1), requested.height.max(1)));

    let template = glutin::config::ConfigTemplateBuilder::new()
        .with_alpha_size(8)
        .with_depth_size(0)
        .with_stencil_size(0)
        .with_transparency(false);

    let display_builder =
        glutin_winit::DisplayBuilder::new().with_window_builder(Some(window_builder));

    let (window, gl_config) = display_builder
        .build(event_loop, template, |configs| {
            // Prefer single-sampled: texels must land on pixels unfiltered.
            configs
                .reduce(|accum, config| {
                    if config.num_samples() < accum.num_samples() {
                        config
                    } else {
                        accum
                    }
                })
                .expect("glutin only calls the picker with at least one config")
        })
        .map_err(|e| unavailable("no compatible GL config", e))?;

    let window = window.ok_or_else(|| {
        EngineError::SurfaceUnavailable("display builder did not create a window".into())
    })?;
    let gl_display = gl_config.display();
    let raw_window_handle = window.raw_window_handle();

    let context_attributes = ContextAttributesBuilder::new()
        .with_profile(GlProfile::Core)
        .with_context_api(ContextApi::OpenGl(Some(Version::new(3, 3))))
        .build(Some(raw_window_handle));

    let not_current = unsafe {
        gl_display
            .create_context(&gl_config, &context_attributes)
            .map_err(|e| unavailable("create_context (GL 3.3 core)", e))?
    };

    let size = window.inner_size();
    let attrs = SurfaceAttributesBuilder::<WindowSurface>::new().build(
        raw_window_handle,
        non_zero(size.width),
        non_zero(size.height),
    );

    let surface = unsafe {
        gl_display
            .create_window_surface(&gl_config, &attrs)
            .map_err(|e| unavailable("create_window_surface", e))?
    };

    let context = not_current
        .make_current(&surface)
        .map_err(|e| unavailable("make_current", e))?;

    let gl = unsafe {
        glow::Context::from_loader_function(|s| match CString::new(s) {
            Ok(name) => gl_display.get_proc_address(name.as_c_str()) as *const _,
            Err(_) => std::ptr::null(),
        })
    };

    tracing::info!(
        width = size.width,
        height = size.height,
        samples = gl_config.num_samples(),
        "GL context ready"
    );

    Ok(GlWindow {
        window,
        surface,
        context,
        gl,
    })
}

impl GlWindow {
    /// Current drawable size in physical pixels (never zero).
    pub fn size(&self) -> (u32, u32) {
        let s = self.window.inner_size();
        (s.width.max(1), s.height.max(1))
    }

    pub fn resize(&self, width: u32, height: u32) {
        self.surface
            .resize(&self.context, non_zero(width), non_zero(height));
    }

    pub fn swap_buffers(&self) -> Result<(), EngineError> {
        self.surface
            .swap_buffers(&self.context)
            .map_err(|e| unavailable("swap_buffers", e))
    }

    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_spec_keeps_image_size() {
        let ws = WindowSpec::new("chroma", 640, 480);
        assert_eq!((ws.width, ws.height), (640, 480));
        assert_eq!(ws.title, "chroma");
    }

    #[test]
    fn zero_sizes_are_clamped_for_surfaces() {
        assert_eq!(non_zero(0).get(), 1);
        assert_eq!(non_zero(7).get(), 7);
    }

    #[test]
    fn unavailable_errors_are_session_fatal() {
        let e = unavailable("make_current", "no display");
        assert_eq!(
            e.to_string(),
            "no compatible rendering surface: make_current: no display"
        );
        assert!(e.is_session_fatal());
    }
}
