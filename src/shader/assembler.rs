//! Final shader program assembly.
//!
//! Takes the cleaned per-stage bodies, the IO registry, the resolved resource
//! table and the shared specification header, and emits the per-stage GLSL
//! `#version 450` strings a GPU program is compiled from. Assembly is pure
//! string work; nothing here touches a device.
//!
//! Emission order per stage is fixed: shared header, stage IO declarations,
//! resource uniform declarations (fragment only), cleaned body. Each mapped
//! resource `name` becomes a `texture2D` named `name_texture` plus a
//! `#define name sampler2D(name_texture, map_sampler)` alias, so artist code
//! samples `texture(name, uv)` unchanged while bindings stay explicit; one
//! shared `map_sampler` follows the textures.

use super::io::{Direction, IoDeclError, IoRegistry, Stage, RESERVED_NAMES};
use super::resources::ResourceTable;
use crate::geometry::VertexLayout;
use std::fmt::Write as _;

/// Errors produced during program assembly.
#[derive(Debug, thiserror::Error)]
pub enum AssembleError {
    #[error(transparent)]
    Io(#[from] IoDeclError),
    #[error("resource uniform `{0}` collides with a declared IO variable")]
    ResourceNameCollision(String),
    #[error("resource uniform `{0}` is a reserved shared-header name")]
    ReservedResourceName(String),
    #[error(
        "vertex layout declares {layout_attributes} attributes but the IO registry declares {declared_attributes}"
    )]
    LayoutMismatch {
        declared_attributes: usize,
        layout_attributes: usize,
    },
}

/// Raw per-stage bodies going into assembly, already stripped of pragmas.
#[derive(Debug, Clone)]
pub struct StageSources {
    pub vertex: String,
    pub geometry: Option<String>,
    pub fragment: String,
}

impl StageSources {
    pub fn new(vertex: impl Into<String>, fragment: impl Into<String>) -> Self {
        Self {
            vertex: vertex.into(),
            geometry: None,
            fragment: fragment.into(),
        }
    }

    pub fn with_geometry(mut self, geometry: impl Into<String>) -> Self {
        self.geometry = Some(geometry.into());
        self
    }
}

/// A fully assembled program: per-stage sources plus everything the GPU
/// builder needs to bind it. Immutable after assembly; any input change means
/// reassembling from scratch.
#[derive(Debug, Clone)]
pub struct AssembledProgram {
    pub vertex_src: String,
    pub geometry_src: Option<String>,
    pub fragment_src: String,
    pub io: IoRegistry,
    pub resources: ResourceTable,
    pub vertex_layout: VertexLayout,
}

/// Combines stage bodies, IO declarations and resource uniforms into
/// compilable per-stage sources.
#[derive(Debug, Clone)]
pub struct ShaderAssembler {
    shared_header: String,
}

impl Default for ShaderAssembler {
    fn default() -> Self {
        Self {
            shared_header: SHARED_HEADER.to_string(),
        }
    }
}

/// Shared specification header prepended to every stage: the always-available
/// uniforms in a std140 block. Member names are reserved (see
/// [`RESERVED_NAMES`]).
pub const SHARED_HEADER: &str = "\
#version 450
layout(set = 0, binding = 0, std140) uniform FrameUniforms {
    vec2 resolution;
    float elapsed_time;
    uint frame_index;
};
";

impl ShaderAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assemble per-stage sources.
    ///
    /// Validates the cross-component vertex contract up front: the layout's
    /// attribute count must equal the registry's vertex-input count, so a
    /// constructor that writes a different shape than the shader declares
    /// fails here instead of corrupting the draw.
    pub fn assemble(
        &self,
        sources: StageSources,
        io: IoRegistry,
        resources: ResourceTable,
        vertex_layout: VertexLayout,
    ) -> Result<AssembledProgram, AssembleError> {
        if vertex_layout.attribute_count() != io.vertex_attribute_count() {
            return Err(AssembleError::LayoutMismatch {
                declared_attributes: io.vertex_attribute_count(),
                layout_attributes: vertex_layout.attribute_count(),
            });
        }
        for name in resources.uniform_names() {
            if RESERVED_NAMES.contains(&name) {
                return Err(AssembleError::ReservedResourceName(name.to_string()));
            }
            if io.variables().iter().any(|v| v.name == name) {
                return Err(AssembleError::ResourceNameCollision(name.to_string()));
            }
        }

        let vertex_src = self.emit_stage(Stage::Vertex, &sources.vertex, &io, None);
        let geometry_src = sources
            .geometry
            .as_deref()
            .map(|body| self.emit_stage(Stage::Geometry, body, &io, None));
        let fragment_src =
            self.emit_stage(Stage::Fragment, &sources.fragment, &io, Some(&resources));

        Ok(AssembledProgram {
            vertex_src,
            geometry_src,
            fragment_src,
            io,
            resources,
            vertex_layout,
        })
    }

    fn emit_stage(
        &self,
        stage: Stage,
        body: &str,
        io: &IoRegistry,
        resources: Option<&ResourceTable>,
    ) -> String {
        let mut out = String::with_capacity(self.shared_header.len() + body.len() + 256);
        out.push_str(&self.shared_header);

        for direction in [Direction::In, Direction::Out] {
            // GLSL only allows interpolation qualifiers on values crossing a
            // rasterizer boundary.
            let interpolated = !matches!(
                (stage, direction),
                (Stage::Vertex, Direction::In) | (Stage::Fragment, Direction::Out)
            );
            for (location, var) in io.stage_io(stage, direction) {
                // fragColor owns fragment output location 0.
                let location = if stage == Stage::Fragment && direction == Direction::Out {
                    location + 1
                } else {
                    location
                };
                let flat = if var.flat && interpolated { "flat " } else { "" };
                let _ = writeln!(
                    out,
                    "layout(location = {location}) {flat}{} {} {};",
                    direction.keyword(),
                    var.glsl_type.glsl(),
                    var.name,
                );
            }
        }

        if stage == Stage::Fragment {
            out.push_str("layout(location = 0) out vec4 fragColor;\n");
            if let Some(table) = resources.filter(|t| !t.is_empty()) {
                for (binding, name) in table.uniform_names().enumerate() {
                    let _ = writeln!(
                        out,
                        "layout(set = 1, binding = {binding}) uniform texture2D {name}_texture;"
                    );
                }
                let _ = writeln!(
                    out,
                    "layout(set = 1, binding = {}) uniform sampler map_sampler;",
                    table.len()
                );
                for name in table.uniform_names() {
                    let _ = writeln!(out, "#define {name} sampler2D({name}_texture, map_sampler)");
                }
            }
        }

        out.push('\n');
        out.push_str(body);
        if !body.ends_with('\n') {
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::VertexLayout;
    use crate::shader::io::{GlslType, IoVariable};
    use crate::shader::pragma;

    fn fullscreen_io() -> IoRegistry {
        let mut io = IoRegistry::new();
        io.declare_all([
            IoVariable::new(Stage::Vertex, Direction::In, GlslType::Vec2, "position"),
            IoVariable::new(Stage::Vertex, Direction::In, GlslType::Vec2, "size"),
            IoVariable::new(Stage::Vertex, Direction::Out, GlslType::Vec2, "v_uv"),
            IoVariable::new(Stage::Fragment, Direction::In, GlslType::Vec2, "v_uv"),
        ])
        .unwrap();
        io
    }

    fn fullscreen_layout() -> VertexLayout {
        VertexLayout::from_spec(&["position", "size"], "2f 2f").unwrap()
    }

    #[test]
    fn test_every_stage_gets_shared_header() {
        let program = ShaderAssembler::new()
            .assemble(
                StageSources::new("void main(){}", "void main(){fragColor=vec4(1.0);}"),
                fullscreen_io(),
                ResourceTable::default(),
                fullscreen_layout(),
            )
            .unwrap();

        for src in [&program.vertex_src, &program.fragment_src] {
            assert!(src.starts_with("#version 450\n"));
            assert!(src.contains("uniform FrameUniforms"));
            assert!(src.contains("vec2 resolution;"));
            assert!(src.contains("float elapsed_time;"));
            assert!(src.contains("uint frame_index;"));
        }
        assert!(program.geometry_src.is_none());
    }

    #[test]
    fn test_io_declarations_match_stage_and_order() {
        let program = ShaderAssembler::new()
            .assemble(
                StageSources::new("void main(){}", "void main(){}"),
                fullscreen_io(),
                ResourceTable::default(),
                fullscreen_layout(),
            )
            .unwrap();

        assert!(program
            .vertex_src
            .contains("layout(location = 0) in vec2 position;"));
        assert!(program
            .vertex_src
            .contains("layout(location = 1) in vec2 size;"));
        assert!(program
            .vertex_src
            .contains("layout(location = 0) out vec2 v_uv;"));
        assert!(program
            .fragment_src
            .contains("layout(location = 0) in vec2 v_uv;"));
        // Vertex attributes never leak into the fragment stage.
        assert!(!program.fragment_src.contains("in vec2 position;"));
    }

    #[test]
    fn test_flat_integer_io_emitted_with_qualifier() {
        let mut io = fullscreen_io();
        io.declare_all([
            IoVariable::new(Stage::Vertex, Direction::Out, GlslType::Int, "v_channel"),
            IoVariable::new(Stage::Fragment, Direction::In, GlslType::Int, "v_channel"),
        ])
        .unwrap();

        let program = ShaderAssembler::new()
            .assemble(
                StageSources::new("void main(){}", "void main(){}"),
                io,
                ResourceTable::default(),
                fullscreen_layout(),
            )
            .unwrap();
        assert!(program
            .fragment_src
            .contains("layout(location = 1) flat in int v_channel;"));
    }

    #[test]
    fn test_resource_declarations_in_binding_order() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.png", "b.png"] {
            image::RgbaImage::new(2, 2).save(dir.path().join(name)).unwrap();
        }
        let (_, directives) =
            pragma::parse("#pragma map bg=image:a.png\n#pragma map fg=image:b.png\n").unwrap();
        let table = crate::shader::resources::ResourceMapper::new(dir.path())
            .resolve(&directives)
            .unwrap();

        let program = ShaderAssembler::new()
            .assemble(
                StageSources::new("void main(){}", "void main(){}"),
                fullscreen_io(),
                table,
                fullscreen_layout(),
            )
            .unwrap();

        let frag = &program.fragment_src;
        assert!(frag.contains("layout(set = 1, binding = 0) uniform texture2D bg_texture;"));
        assert!(frag.contains("layout(set = 1, binding = 1) uniform texture2D fg_texture;"));
        assert!(frag.contains("layout(set = 1, binding = 2) uniform sampler map_sampler;"));
        assert!(frag.contains("#define bg sampler2D(bg_texture, map_sampler)"));
        // Resources are a fragment-stage concern only.
        assert!(!program.vertex_src.contains("bg_texture"));
    }

    #[test]
    fn test_fragment_declares_frag_color_once() {
        let program = ShaderAssembler::new()
            .assemble(
                StageSources::new("void main(){}", "void main(){fragColor=vec4(0.0);}"),
                fullscreen_io(),
                ResourceTable::default(),
                fullscreen_layout(),
            )
            .unwrap();
        let count = program
            .fragment_src
            .matches("out vec4 fragColor;")
            .count();
        assert_eq!(count, 1);
        assert!(!program.vertex_src.contains("fragColor"));
    }

    #[test]
    fn test_layout_cardinality_mismatch_rejected() {
        let layout = VertexLayout::from_spec(&["position"], "2f").unwrap();
        let err = ShaderAssembler::new()
            .assemble(
                StageSources::new("void main(){}", "void main(){}"),
                fullscreen_io(),
                ResourceTable::default(),
                layout,
            )
            .unwrap_err();
        assert!(matches!(
            err,
            AssembleError::LayoutMismatch {
                declared_attributes: 2,
                layout_attributes: 1,
            }
        ));
    }

    #[test]
    fn test_reserved_resource_name_rejected() {
        let dir = tempfile::tempdir().unwrap();
        image::RgbaImage::new(2, 2).save(dir.path().join("a.png")).unwrap();
        let (_, directives) = pragma::parse("#pragma map resolution=image:a.png\n").unwrap();
        let table = crate::shader::resources::ResourceMapper::new(dir.path())
            .resolve(&directives)
            .unwrap();

        let err = ShaderAssembler::new()
            .assemble(
                StageSources::new("void main(){}", "void main(){}"),
                fullscreen_io(),
                table,
                fullscreen_layout(),
            )
            .unwrap_err();
        assert!(matches!(err, AssembleError::ReservedResourceName(_)));
    }

    #[test]
    fn test_geometry_stage_assembled_when_present() {
        let program = ShaderAssembler::new()
            .assemble(
                StageSources::new("void main(){}", "void main(){}")
                    .with_geometry("void main(){EmitVertex();}"),
                fullscreen_io(),
                ResourceTable::default(),
                fullscreen_layout(),
            )
            .unwrap();
        let geometry = program.geometry_src.unwrap();
        assert!(geometry.starts_with("#version 450\n"));
        assert!(geometry.contains("EmitVertex"));
    }

    #[test]
    fn test_end_to_end_pragma_to_program() {
        let dir = tempfile::tempdir().unwrap();
        image::RgbaImage::new(2, 2).save(dir.path().join("bg.png")).unwrap();

        let source =
            "#pragma map bg=image:bg.png:640x480\nvoid main(){fragColor=texture(bg,v_uv);}";
        let (cleaned, directives) = pragma::parse(source).unwrap();
        assert_eq!(directives.len(), 1);
        assert!(!cleaned.contains("#pragma"));

        let table = crate::shader::resources::ResourceMapper::new(dir.path())
            .resolve(&directives)
            .unwrap();
        let program = ShaderAssembler::new()
            .assemble(
                StageSources::new("void main(){}", cleaned),
                fullscreen_io(),
                table,
                fullscreen_layout(),
            )
            .unwrap();

        assert_eq!(program.resources.len(), 1);
        assert_eq!(program.resources.entries()[0].uniform_name, "bg");
        assert_eq!(
            program.resources.entries()[0].declared_resolution,
            Some((640, 480))
        );
        // Exactly one sampled resource named `bg` in the fragment stage.
        assert_eq!(program.fragment_src.matches("uniform texture2D").count(), 1);
        assert!(program.fragment_src.contains("bg_texture"));
    }
}
