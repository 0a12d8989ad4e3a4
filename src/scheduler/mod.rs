//! Per-frame render scheduling.
//!
//! The scheduler owns the GPU context, the layer stack and the playback
//! clock, and drives the frame cycle: advance the clock, regenerate each
//! layer's geometry, re-render time-varying nested resources, draw the
//! layers back-to-front into the frame target, read the pixels back and hand
//! them to the sink. Pacing targets a fixed frame duration; running over
//! budget is logged and counted but never drops a frame; sync correctness
//! beats throughput here.
//!
//! A layer whose constructor fails (capacity overflow, typically) is
//! reported in the frame outcome, marked faulted and skipped from then on;
//! the rest of the stack keeps rendering.

pub mod sink;

pub use sink::{pack_rgba, ChannelSink, Frame, PipeSink, PixelFormat, PixelSink};

use crate::geometry::{GeometryConstructor, GeometryError};
use crate::gpu::{GpuContext, LayerProgram, ProgramError, ReadbackBuffer, RenderTarget};
use crate::score::PlaybackClock;
use crate::shader::assembler::{AssembleError, ShaderAssembler, StageSources};
use crate::shader::io::IoDeclError;
use crate::shader::pragma::{self, PragmaError};
use crate::shader::resources::{ResourceError, ResourceMapper};
use crate::shader::IoRegistry;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::PathBuf;
use std::time::Instant;

/// Errors building one layer's program; fatal to that layer only, so the
/// caller can keep the rest of the stack rendering.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Pragma(#[from] PragmaError),
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error(transparent)]
    IoDecl(#[from] IoDeclError),
    #[error(transparent)]
    Assemble(#[from] AssembleError),
    #[error(transparent)]
    Program(#[from] ProgramError),
}

/// Errors that stop the scheduler.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("scheduler is closed")]
    Closed,
    #[error("pixel sink error: {0}")]
    Sink(#[from] io::Error),
}

/// Scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub pixel_format: PixelFormat,
    pub background: [f32; 3],
    /// Sleep out the remainder of the frame budget (real-time playback).
    /// Offline encodes turn this off and let sink backpressure set the pace.
    pub pace: bool,
    /// Sub-shader recursion cap handed to the resource mapper.
    pub max_include_depth: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            fps: 30,
            pixel_format: PixelFormat::Rgb24,
            background: [0.0, 0.0, 0.0],
            pace: true,
            max_include_depth: crate::shader::DEFAULT_MAX_INCLUDE_DEPTH,
        }
    }
}

/// Everything needed to build one visual layer.
pub struct LayerDesc {
    pub name: String,
    /// Authored fragment source, pragma directives included.
    pub fragment_source: String,
    /// Vertex-stage body matching the constructor's IO contract.
    pub vertex_body: String,
    /// Directory pragma paths resolve against.
    pub resource_root: PathBuf,
    pub constructor: Box<dyn GeometryConstructor>,
}

struct Layer {
    name: String,
    program: LayerProgram,
    constructor: Box<dyn GeometryConstructor>,
    fault: Option<String>,
}

/// Scheduler lifecycle states. `Closed` is terminal and reachable from any
/// state via a shutdown request, which takes effect at the next `Idle`
/// transition. There is no mid-frame cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Rendering,
    Presenting,
    Closed,
}

/// A layer failure surfaced from one frame.
#[derive(Debug)]
pub struct LayerFault {
    pub layer: String,
    pub error: GeometryError,
}

/// What one frame cycle produced.
#[derive(Debug)]
pub struct FrameOutcome {
    pub frame: Frame,
    /// Layers that faulted this frame; they are skipped from now on.
    pub faults: Vec<LayerFault>,
}

/// Accounting for a whole run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub frames: u64,
    pub deadline_misses: u64,
    pub faulted_layers: Vec<String>,
}

/// Drives the per-frame cycle against a pixel sink.
pub struct FrameScheduler<S: PixelSink> {
    ctx: GpuContext,
    config: SchedulerConfig,
    clock: PlaybackClock,
    state: SchedulerState,
    layers: Vec<Layer>,
    frame_target: RenderTarget,
    readback: ReadbackBuffer,
    sink: S,
    frames_rendered: u64,
    deadline_misses: u64,
    shutdown_requested: bool,
}

impl<S: PixelSink> FrameScheduler<S> {
    pub fn new(ctx: GpuContext, config: SchedulerConfig, sink: S) -> Self {
        let frame_target =
            RenderTarget::frame_output(&ctx.device, "frame_target", config.width, config.height);
        let readback = ReadbackBuffer::new(&ctx.device, config.width, config.height);
        let clock = PlaybackClock::new(config.fps);
        Self {
            ctx,
            config,
            clock,
            state: SchedulerState::Idle,
            layers: Vec::new(),
            frame_target,
            readback,
            sink,
            frames_rendered: 0,
            deadline_misses: 0,
            shutdown_requested: false,
        }
    }

    /// Build a layer from its description and append it to the stack.
    /// Layers draw in insertion order, back to front.
    pub fn add_layer(&mut self, desc: LayerDesc) -> Result<(), BuildError> {
        let (cleaned, directives) = pragma::parse(&desc.fragment_source)?;
        let table = ResourceMapper::new(&desc.resource_root)
            .with_max_depth(self.config.max_include_depth)
            .resolve(&directives)?;

        let mut io = IoRegistry::new();
        io.declare_all(desc.constructor.io_contract())?;

        let assembled = ShaderAssembler::new().assemble(
            StageSources::new(desc.vertex_body, cleaned),
            io,
            table,
            desc.constructor.vertex_layout().clone(),
        )?;

        let program = LayerProgram::new(
            &self.ctx,
            assembled,
            desc.constructor.topology(),
            desc.constructor.max_vertices(),
            (self.config.width, self.config.height),
        )?;

        log::info!("layer `{}` compiled and bound", desc.name);
        self.layers.push(Layer {
            name: desc.name,
            program,
            constructor: desc.constructor,
            fault: None,
        });
        Ok(())
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn clock(&self) -> &PlaybackClock {
        &self.clock
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    pub fn deadline_misses(&self) -> u64 {
        self.deadline_misses
    }

    /// Names of layers currently skipped due to a fault.
    pub fn faulted_layers(&self) -> Vec<String> {
        self.layers
            .iter()
            .filter(|l| l.fault.is_some())
            .map(|l| l.name.clone())
            .collect()
    }

    /// Request cooperative shutdown; takes effect at the next `Idle`
    /// transition, never mid-frame.
    pub fn request_shutdown(&mut self) {
        self.shutdown_requested = true;
    }

    /// Run one full frame cycle: geometry, draws, readback, sink delivery.
    pub fn advance_frame(&mut self) -> Result<FrameOutcome, SchedulerError> {
        if self.state == SchedulerState::Closed {
            return Err(SchedulerError::Closed);
        }
        if self.shutdown_requested {
            self.close()?;
            return Err(SchedulerError::Closed);
        }

        // The clock moves one frame duration per cycle; frame zero renders
        // at t = 0.
        if self.frames_rendered > 0 {
            self.clock.advance();
        }
        self.state = SchedulerState::Rendering;
        let clock = self.clock;

        let mut faults = Vec::new();
        for layer in &mut self.layers {
            if layer.fault.is_some() {
                continue;
            }
            match layer.constructor.next_frame_buffer(&clock) {
                Ok(frame) => {
                    layer.program.upload_geometry(&self.ctx.queue, &frame);
                    layer.program.prepare_frame(&self.ctx, &clock);
                }
                Err(error) => {
                    log::error!("layer `{}` faulted: {error}; skipping from now on", layer.name);
                    layer.fault = Some(error.to_string());
                    faults.push(LayerFault {
                        layer: layer.name.clone(),
                        error,
                    });
                }
            }
        }

        let mut encoder = self
            .ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("frame_encoder"),
            });

        let background = wgpu::Color {
            r: self.config.background[0] as f64,
            g: self.config.background[1] as f64,
            b: self.config.background[2] as f64,
            a: 1.0,
        };
        let mut load = wgpu::LoadOp::Clear(background);
        for layer in self.layers.iter().filter(|l| l.fault.is_none()) {
            layer
                .program
                .encode(&mut encoder, self.frame_target.view(), load);
            load = wgpu::LoadOp::Load;
        }
        if matches!(load, wgpu::LoadOp::Clear(_)) {
            // Nothing drew; clear the target so the sink still gets a frame.
            clear_pass(&mut encoder, self.frame_target.view(), background);
        }

        self.readback.encode_copy(&mut encoder, &self.frame_target);
        self.ctx.queue.submit(std::iter::once(encoder.finish()));

        self.state = SchedulerState::Presenting;
        let rgba = self.readback.read_pixels(&self.ctx.device);
        let packed = pack_rgba(&rgba, self.config.pixel_format);

        let frame = Frame {
            index: self.clock.frame_index(),
            timestamp: self.clock.time(),
        };
        // The one intentional blocking point outside GPU calls: a full sink
        // throttles rendering.
        self.sink.write_frame(&frame, &packed)?;

        self.frames_rendered += 1;
        self.state = SchedulerState::Idle;
        Ok(FrameOutcome { frame, faults })
    }

    /// Render `total_frames` frames with fixed-duration pacing, then close.
    pub fn run(&mut self, total_frames: u64) -> Result<RunSummary, SchedulerError> {
        let budget = self.clock.frame_duration();
        while self.frames_rendered < total_frames && !self.shutdown_requested {
            let started = Instant::now();
            self.advance_frame()?;
            let elapsed = started.elapsed();
            if elapsed > budget {
                // Observational only; the frame was still delivered.
                self.deadline_misses += 1;
                log::warn!(
                    "deadline miss on frame {}: {elapsed:?} over a {budget:?} budget",
                    self.frames_rendered - 1
                );
            } else if self.config.pace {
                std::thread::sleep(budget - elapsed);
            }
        }
        self.close()?;
        Ok(RunSummary {
            frames: self.frames_rendered,
            deadline_misses: self.deadline_misses,
            faulted_layers: self.faulted_layers(),
        })
    }

    /// Flush the sink and enter the terminal state.
    pub fn close(&mut self) -> Result<(), SchedulerError> {
        if self.state != SchedulerState::Closed {
            self.sink.finish()?;
            self.state = SchedulerState::Closed;
            log::info!(
                "scheduler closed after {} frames ({} deadline misses)",
                self.frames_rendered,
                self.deadline_misses
            );
        }
        Ok(())
    }
}

fn clear_pass(
    encoder: &mut wgpu::CommandEncoder,
    view: &wgpu::TextureView,
    color: wgpu::Color,
) {
    encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some("clear_pass"),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view,
            resolve_target: None,
            depth_slice: None,
            ops: wgpu::Operations {
                load: wgpu::LoadOp::Clear(color),
                store: wgpu::StoreOp::Store,
            },
        })],
        depth_stencil_attachment: None,
        timestamp_writes: None,
        occlusion_query_set: None,
        multiview_mask: None,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.width, 1920);
        assert_eq!(config.height, 1080);
        assert_eq!(config.fps, 30);
        assert_eq!(config.pixel_format, PixelFormat::Rgb24);
        assert_eq!(config.max_include_depth, 8);
        assert!(config.pace);
    }

    #[test]
    fn test_config_json_round_trip() {
        let config = SchedulerConfig {
            width: 640,
            height: 360,
            fps: 60,
            pixel_format: PixelFormat::Rgba32,
            ..SchedulerConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: SchedulerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.width, 640);
        assert_eq!(back.fps, 60);
        assert_eq!(back.pixel_format, PixelFormat::Rgba32);
    }
}
