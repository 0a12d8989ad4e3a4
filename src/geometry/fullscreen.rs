//! Full-viewport quad constructor.
//!
//! The degenerate baseline for shaders with no per-frame geometry: four strip
//! vertices written exactly once at construction. The issue state makes the
//! "written once, reused forever" contract explicit: the buffer bytes are
//! handed out on the first frame and every later frame reports the cached
//! buffer as unchanged.

use super::{FrameGeometry, GeometryConstructor, GeometryError, Topology, VertexLayout};
use crate::score::PlaybackClock;
use crate::shader::io::{Direction, GlslType, IoVariable, Stage};

/// Default vertex-stage body matching [`FullScreenConstructor`]'s IO
/// contract.
pub const FULLSCREEN_VERTEX_BODY: &str = "\
void main() {
    v_uv = position * 0.5 + 0.5;
    gl_Position = vec4(position, 0.0, 1.0);
}
";

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct QuadVertex {
    position: [f32; 2],
    size: [f32; 2],
}

/// Whether the constructed buffer has been handed to the GPU yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IssueState {
    NotSent,
    Sent,
}

/// Stateless full-viewport quad.
pub struct FullScreenConstructor {
    vertices: [QuadVertex; 4],
    layout: VertexLayout,
    state: IssueState,
}

impl FullScreenConstructor {
    pub fn new() -> Self {
        // NDC corners in strip order; size is the full viewport span.
        let size = [2.0, 2.0];
        let vertices = [
            QuadVertex { position: [-1.0, -1.0], size },
            QuadVertex { position: [1.0, -1.0], size },
            QuadVertex { position: [-1.0, 1.0], size },
            QuadVertex { position: [1.0, 1.0], size },
        ];
        let layout = VertexLayout::from_spec(&["position", "size"], "2f 2f")
            .expect("static layout spec is valid");
        Self {
            vertices,
            layout,
            state: IssueState::NotSent,
        }
    }

    /// Whether the buffer has already been issued.
    pub fn issued(&self) -> bool {
        self.state == IssueState::Sent
    }
}

impl Default for FullScreenConstructor {
    fn default() -> Self {
        Self::new()
    }
}

impl GeometryConstructor for FullScreenConstructor {
    fn io_contract(&self) -> Vec<IoVariable> {
        vec![
            IoVariable::new(Stage::Vertex, Direction::In, GlslType::Vec2, "position"),
            IoVariable::new(Stage::Vertex, Direction::In, GlslType::Vec2, "size"),
            IoVariable::new(Stage::Vertex, Direction::Out, GlslType::Vec2, "v_uv"),
            IoVariable::new(Stage::Fragment, Direction::In, GlslType::Vec2, "v_uv"),
        ]
    }

    fn vertex_layout(&self) -> &VertexLayout {
        &self.layout
    }

    fn topology(&self) -> Topology {
        Topology::TriangleStrip
    }

    fn max_vertices(&self) -> u32 {
        4
    }

    fn next_frame_buffer(
        &mut self,
        _clock: &PlaybackClock,
    ) -> Result<FrameGeometry<'_>, GeometryError> {
        match self.state {
            IssueState::NotSent => {
                self.state = IssueState::Sent;
                Ok(FrameGeometry::Updated {
                    data: bytemuck::cast_slice(&self.vertices),
                    vertex_count: 4,
                })
            }
            IssueState::Sent => Ok(FrameGeometry::Unchanged { vertex_count: 4 }),
        }
    }
}
