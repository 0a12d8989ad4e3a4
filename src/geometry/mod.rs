//! Per-frame geometry construction.
//!
//! A geometry constructor owns its vertex data exclusively: it declares the
//! IO contract the paired shader must carry, describes the interleaved buffer
//! layout, and regenerates (or reuses) the vertex bytes once per frame. The
//! layout description and the bytes written must agree component-for-
//! component; that contract is validated at assembly and asserted again
//! before every draw.

mod fullscreen;
mod piano_roll;

pub use fullscreen::{FullScreenConstructor, FULLSCREEN_VERTEX_BODY};
pub use piano_roll::{
    PianoRollConstructor, RollChannel, RollOptions, KEY_BED_VERTEX_BODY, NOTE_BARS_VERTEX_BODY,
};

use crate::score::PlaybackClock;
use crate::shader::io::IoVariable;

/// Errors raised by geometry constructors.
#[derive(Debug, thiserror::Error)]
pub enum GeometryError {
    #[error("frame needs {requested} notes but the buffer holds {capacity}")]
    CapacityExceeded { requested: usize, capacity: usize },
    #[error("invalid vertex layout spec `{spec}`: {reason}")]
    InvalidLayout { spec: String, reason: String },
}

/// Scalar type of one interleaved attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeType {
    Float,
    Sint,
    Uint,
}

impl AttributeType {
    fn type_char(&self) -> char {
        match self {
            Self::Float => 'f',
            Self::Sint => 'i',
            Self::Uint => 'u',
        }
    }
}

/// One named attribute in an interleaved vertex layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexAttributeSpec {
    pub name: String,
    pub components: u32,
    pub attribute_type: AttributeType,
}

impl VertexAttributeSpec {
    /// wgpu format for this attribute. All components are 32-bit.
    pub fn format(&self) -> wgpu::VertexFormat {
        use wgpu::VertexFormat as F;
        match (self.attribute_type, self.components) {
            (AttributeType::Float, 1) => F::Float32,
            (AttributeType::Float, 2) => F::Float32x2,
            (AttributeType::Float, 3) => F::Float32x3,
            (AttributeType::Float, _) => F::Float32x4,
            (AttributeType::Sint, 1) => F::Sint32,
            (AttributeType::Sint, 2) => F::Sint32x2,
            (AttributeType::Sint, 3) => F::Sint32x3,
            (AttributeType::Sint, _) => F::Sint32x4,
            (AttributeType::Uint, 1) => F::Uint32,
            (AttributeType::Uint, 2) => F::Uint32x2,
            (AttributeType::Uint, 3) => F::Uint32x3,
            (AttributeType::Uint, _) => F::Uint32x4,
        }
    }
}

/// Interleaved vertex layout: ordered attribute names with component counts,
/// parsed from the `<count><type>` token form (`"2f 2f 1i"`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexLayout {
    attributes: Vec<VertexAttributeSpec>,
}

impl VertexLayout {
    /// Parse a layout from attribute names and a token string. Token count
    /// and name count must match.
    pub fn from_spec(names: &[&str], spec: &str) -> Result<Self, GeometryError> {
        let invalid = |reason: &str| GeometryError::InvalidLayout {
            spec: spec.to_string(),
            reason: reason.to_string(),
        };

        let tokens: Vec<&str> = spec.split_whitespace().collect();
        if tokens.len() != names.len() {
            return Err(invalid(&format!(
                "{} tokens for {} attribute names",
                tokens.len(),
                names.len()
            )));
        }

        let mut attributes = Vec::with_capacity(tokens.len());
        for (name, token) in names.iter().zip(&tokens) {
            let mut chars = token.chars();
            let components = chars
                .next()
                .and_then(|c| c.to_digit(10))
                .filter(|&n| (1..=4).contains(&n))
                .ok_or_else(|| invalid(&format!("bad component count in `{token}`")))?;
            let attribute_type = match chars.next() {
                Some('f') => AttributeType::Float,
                Some('i') => AttributeType::Sint,
                Some('u') => AttributeType::Uint,
                _ => return Err(invalid(&format!("bad type char in `{token}`"))),
            };
            if chars.next().is_some() {
                return Err(invalid(&format!("trailing characters in `{token}`")));
            }
            attributes.push(VertexAttributeSpec {
                name: (*name).to_string(),
                components,
                attribute_type,
            });
        }

        Ok(Self { attributes })
    }

    pub fn attributes(&self) -> &[VertexAttributeSpec] {
        &self.attributes
    }

    pub fn attribute_count(&self) -> usize {
        self.attributes.len()
    }

    /// Total components written per vertex.
    pub fn component_sum(&self) -> u32 {
        self.attributes.iter().map(|a| a.components).sum()
    }

    /// Interleaved stride in bytes (all components are 32-bit).
    pub fn stride(&self) -> u64 {
        self.component_sum() as u64 * 4
    }

    /// Canonical token form, e.g. `"2f 2f 1i"`.
    pub fn spec_string(&self) -> String {
        self.attributes
            .iter()
            .map(|a| format!("{}{}", a.components, a.attribute_type.type_char()))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// wgpu vertex attributes with sequential shader locations.
    pub fn wgpu_attributes(&self) -> Vec<wgpu::VertexAttribute> {
        let mut offset = 0u64;
        self.attributes
            .iter()
            .enumerate()
            .map(|(i, attr)| {
                let a = wgpu::VertexAttribute {
                    offset,
                    shader_location: i as u32,
                    format: attr.format(),
                };
                offset += attr.components as u64 * 4;
                a
            })
            .collect()
    }
}

/// How the vertex stream is turned into triangles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topology {
    /// Four vertices as one strip quad.
    TriangleStrip,
    /// Quads of four vertices drawn via a shared 6-index pattern per quad.
    QuadList,
}

/// Result of a per-frame geometry pass.
#[derive(Debug)]
pub enum FrameGeometry<'a> {
    /// Buffer content is unchanged from the previous frame; skip the upload.
    Unchanged { vertex_count: u32 },
    /// Freshly written interleaved vertex bytes to upload.
    Updated { data: &'a [u8], vertex_count: u32 },
}

impl FrameGeometry<'_> {
    pub fn vertex_count(&self) -> u32 {
        match self {
            Self::Unchanged { vertex_count } | Self::Updated { vertex_count, .. } => *vertex_count,
        }
    }
}

/// A per-frame vertex data producer paired with the shader IO it requires.
pub trait GeometryConstructor: Send {
    /// IO variables the paired shader program must declare, in order.
    fn io_contract(&self) -> Vec<IoVariable>;

    /// Interleaved layout of the buffer this constructor writes.
    fn vertex_layout(&self) -> &VertexLayout;

    fn topology(&self) -> Topology;

    /// Largest vertex count a frame can produce; sizes the GPU buffer once.
    fn max_vertices(&self) -> u32;

    /// Produce geometry for the frame at `clock`. Called exactly once per
    /// frame before the draw. On error the previous successful frame's data
    /// must be left intact.
    fn next_frame_buffer(&mut self, clock: &PlaybackClock)
        -> Result<FrameGeometry<'_>, GeometryError>;
}
