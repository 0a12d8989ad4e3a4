//! Midivis Core
//!
//! GPU-accelerated MIDI-reactive shader compositing library for rendering
//! note-timeline visualizations to raw video frames.
//!
//! # Features
//!
//! - `#pragma map` preprocessing of authored GLSL fragment shaders
//!   (images, nested sub-shaders, scratch render targets)
//! - Typed shader-stage IO registry with deterministic attribute locations
//! - Per-frame piano-roll geometry (note bars and key bed) from a MIDI
//!   note timeline, plus a static fullscreen quad baseline
//! - Headless rendering via wgpu (Metal on macOS, Vulkan on Linux) with
//!   GLSL compiled through the naga frontend
//! - Frame-paced scheduling with readback into a raw pixel sink
//!   (encoder/player pipe)

pub mod geometry;
pub mod gpu;
pub mod scheduler;
pub mod score;
pub mod shader;

// Re-export commonly used types
pub use geometry::{
    FrameGeometry, FullScreenConstructor, GeometryConstructor, GeometryError,
    PianoRollConstructor, RollChannel, RollOptions, Topology, VertexLayout,
    FULLSCREEN_VERTEX_BODY, KEY_BED_VERTEX_BODY, NOTE_BARS_VERTEX_BODY,
};
pub use gpu::{GpuContext, GpuError, LayerProgram, ProgramError};
pub use scheduler::{
    BuildError, ChannelSink, Frame, FrameOutcome, FrameScheduler, LayerDesc, LayerFault,
    PipeSink, PixelFormat, PixelSink, RunSummary, SchedulerConfig, SchedulerError, SchedulerState,
};
pub use score::{is_white_key, NoteEvent, NoteTimeline, PlaybackClock};
pub use shader::{
    parse_pragmas, AssembledProgram, Directive, IoRegistry, IoVariable, ResourceKind,
    ResourceMapper, ResourceTable, ShaderAssembler, StageSources,
};
