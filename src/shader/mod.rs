//! Shader construction: pragma scanning, IO contracts, resource resolution
//! and final program assembly.
//!
//! The flow mirrors how a layer comes to life: an authored fragment source is
//! scanned for `#pragma map` directives, the directives are resolved against
//! the filesystem into a [`resources::ResourceTable`], and the cleaned body
//! is assembled together with the IO registry and shared headers into an
//! [`assembler::AssembledProgram`] ready for GPU compilation.

pub mod assembler;
pub mod io;
pub mod pragma;
pub mod resources;

pub use assembler::{AssembledProgram, AssembleError, ShaderAssembler, StageSources, SHARED_HEADER};
pub use io::{Direction, GlslType, IoDeclError, IoRegistry, IoVariable, Stage, RESERVED_NAMES};
pub use pragma::{parse as parse_pragmas, Directive, PragmaError, ResourceKind};
pub use resources::{
    ResolvedKind, ResolvedResource, ResolvedShader, ResourceError, ResourceMapper, ResourceTable,
    DEFAULT_MAX_INCLUDE_DEPTH,
};
