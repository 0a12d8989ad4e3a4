//! GPU rendering via wgpu.
//!
//! Headless only: programs render into offscreen targets and frames are read
//! back for the pixel sink. Assembled GLSL is compiled through the naga
//! frontend; pipelines, buffers and bound resources live in
//! [`program::LayerProgram`].

pub mod context;
pub mod layouts;
pub mod program;
pub mod targets;

pub use context::{GpuContext, GpuError};
pub use program::{LayerProgram, ProgramError};
pub use targets::{ReadbackBuffer, RenderTarget, TARGET_FORMAT};
