use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chroma_control_osc::OscParamReceiver;
use chroma_controls::FilterController;
use chroma_core::EngineError;
use chroma_host_winit::{make_gl, GlWindow, WindowSpec, SURFACE_UNAVAILABLE_MESSAGE};
use chroma_runtime::{ChannelScale, ChannelScaleSink};
use chroma_runtime_glow::{RenderPipeline, SurfaceSize};
use tracing_subscriber::EnvFilter;
use winit::event::{Event, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop};

use crate::cli::Cli;
use crate::config::ViewerConfig;

/// How often OSC is drained while the window is otherwise idle.
const OSC_POLL_INTERVAL: Duration = Duration::from_millis(16);

pub fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Pushes scales into the pipeline and presents the redrawn frame.
struct PresentingSink<'a> {
    host: &'a GlWindow,
    pipeline: &'a mut RenderPipeline<glow::Context>,
}

impl ChannelScaleSink for PresentingSink<'_> {
    fn apply_channel_scale(&mut self, scale: ChannelScale) -> Result<(), EngineError> {
        unsafe {
            self.pipeline
                .set_channel_scale(&self.host.gl, scale.r, scale.g, scale.b)?;
        }
        self.host.swap_buffers()
    }
}

pub fn run(cli: Cli) -> Result<()> {
    let cfg = ViewerConfig::from_cli(&cli).context("failed to resolve viewer config")?;
    tracing::debug!(?cfg, "resolved viewer config");

    let image = chroma_input_image::load_from_config(&cfg.image_config())
        .with_context(|| format!("failed to load image {}", cfg.image_path().display()))?;
    tracing::info!(
        path = %cfg.image,
        width = image.width(),
        height = image.height(),
        "image loaded"
    );

    let event_loop = EventLoop::new();
    let host = match make_gl(
        &event_loop,
        &WindowSpec::new(cfg.title.clone(), image.width(), image.height()),
    ) {
        Ok(host) => host,
        Err(e) => {
            tracing::error!(error = %e, "no rendering surface");
            eprintln!("{SURFACE_UNAVAILABLE_MESSAGE}");
            return Err(e).context("window creation failed");
        }
    };

    let (w, h) = host.size();
    let mut pipeline = RenderPipeline::<glow::Context>::new();
    unsafe { pipeline.initialize(&host.gl, SurfaceSize::new(w, h), &image) }
        .context("render pipeline initialization failed")?;
    host.swap_buffers()?;

    let mut controller = FilterController::from_config(&cfg.controls);
    if !controller.scale().is_identity() {
        let mut sink = PresentingSink {
            host: &host,
            pipeline: &mut pipeline,
        };
        controller.push(&mut sink)?;
    }

    if let Some(path) = &cli.snapshot {
        write_snapshot(&host, &pipeline, path)?;
        unsafe { pipeline.destroy(&host.gl) };
        return Ok(());
    }

    let mut osc = match cfg.osc.as_deref().map(OscParamReceiver::bind) {
        Some(Ok(rx)) => Some(rx),
        Some(Err(e)) => {
            tracing::warn!(error = %e, "OSC disabled: could not bind");
            None
        }
        None => None,
    };

    event_loop.run(move |event, _, control_flow| {
        *control_flow = if osc.is_some() {
            ControlFlow::WaitUntil(Instant::now() + OSC_POLL_INTERVAL)
        } else {
            ControlFlow::Wait
        };

        let outcome = match event {
            Event::WindowEvent { event, .. } => match event {
                WindowEvent::CloseRequested => {
                    *control_flow = ControlFlow::Exit;
                    Ok(())
                }

                WindowEvent::ReceivedCharacter('\u{1b}') => {
                    *control_flow = ControlFlow::Exit;
                    Ok(())
                }

                WindowEvent::ReceivedCharacter(ch) => {
                    let mut sink = PresentingSink {
                        host: &host,
                        pipeline: &mut pipeline,
                    };
                    controller.on_key(ch, &mut sink).map(|consumed| {
                        if consumed {
                            tracing::debug!(key = ?ch, fields = ?controller.fields(), "filter input");
                        }
                    })
                }

                WindowEvent::Resized(size) => {
                    host.resize(size.width, size.height);
                    host.request_redraw();
                    Ok(())
                }

                _ => Ok(()),
            },

            Event::MainEventsCleared => match osc.as_mut() {
                Some(rx) => {
                    let mut sink = PresentingSink {
                        host: &host,
                        pipeline: &mut pipeline,
                    };
                    rx.poll().into_iter().try_for_each(|(name, value)| {
                        controller.on_param(&name, value, &mut sink).map(|_| ())
                    })
                }
                None => Ok(()),
            },

            Event::RedrawRequested(_) => {
                unsafe { pipeline.draw(&host.gl) }.and_then(|()| host.swap_buffers())
            }

            Event::LoopDestroyed => {
                unsafe { pipeline.destroy(&host.gl) };
                tracing::debug!("GPU resources released");
                Ok(())
            }

            _ => Ok(()),
        };

        if let Err(e) = outcome {
            tracing::error!(error = %e, "render failed");
            if e.is_session_fatal() || matches!(e, EngineError::NotReady { .. }) {
                *control_flow = ControlFlow::ExitWithCode(1);
            }
        }
    });
}

fn write_snapshot(host: &GlWindow, pipeline: &RenderPipeline<glow::Context>, path: &Path) -> Result<()> {
    let frame = unsafe { pipeline.capture(&host.gl) }?;
    let (w, h) = frame.size();
    image::save_buffer(path, frame.rgba(), w, h, image::ExtendedColorType::Rgba8)
        .with_context(|| format!("failed to write snapshot {}", path.display()))?;
    tracing::info!(path = %path.display(), w, h, "snapshot written");
    Ok(())
}
