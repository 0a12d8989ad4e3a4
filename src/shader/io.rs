//! Typed shader-stage IO variable registry.
//!
//! Every input/output a program stage declares goes through this registry so
//! that declaration order (and therefore GPU location assignment) is explicit
//! and testable rather than a side effect of string concatenation. The
//! registry is populated at setup time by geometry constructors and callers,
//! then frozen into the assembled program.

/// GLSL scalar/vector types usable as stage IO.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GlslType {
    Float,
    Int,
    Uint,
    Vec2,
    Vec3,
    Vec4,
    IVec2,
    Sampler2D,
}

impl GlslType {
    /// GLSL spelling of the type.
    pub fn glsl(&self) -> &'static str {
        match self {
            Self::Float => "float",
            Self::Int => "int",
            Self::Uint => "uint",
            Self::Vec2 => "vec2",
            Self::Vec3 => "vec3",
            Self::Vec4 => "vec4",
            Self::IVec2 => "ivec2",
            Self::Sampler2D => "sampler2D",
        }
    }

    /// Component count for vertex-attribute layout checks. Samplers are not
    /// attribute types and report zero.
    pub fn components(&self) -> u32 {
        match self {
            Self::Float | Self::Int | Self::Uint => 1,
            Self::Vec2 | Self::IVec2 => 2,
            Self::Vec3 => 3,
            Self::Vec4 => 4,
            Self::Sampler2D => 0,
        }
    }

    /// Whether GLSL requires the `flat` qualifier when interpolating.
    pub fn requires_flat(&self) -> bool {
        matches!(self, Self::Int | Self::Uint | Self::IVec2)
    }
}

/// Shader pipeline stage an IO variable belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Vertex,
    Geometry,
    Fragment,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Vertex => "vertex",
            Self::Geometry => "geometry",
            Self::Fragment => "fragment",
        }
    }
}

/// Direction of an IO variable relative to its stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    pub fn keyword(&self) -> &'static str {
        match self {
            Self::In => "in",
            Self::Out => "out",
        }
    }
}

/// A single declared stage IO variable.
///
/// Immutable once the owning program is assembled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoVariable {
    pub name: String,
    pub glsl_type: GlslType,
    pub direction: Direction,
    pub stage: Stage,
    pub flat: bool,
}

impl IoVariable {
    pub fn new(
        stage: Stage,
        direction: Direction,
        glsl_type: GlslType,
        name: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            glsl_type,
            direction,
            stage,
            // Integer interpolants are always flat in GLSL.
            flat: glsl_type.requires_flat(),
        }
    }

    pub fn flat(mut self) -> Self {
        self.flat = true;
        self
    }
}

/// Errors raised while declaring IO variables.
#[derive(Debug, thiserror::Error)]
pub enum IoDeclError {
    #[error("duplicate IO variable `{name}` ({stage} {direction})")]
    DuplicateIoVariable {
        stage: &'static str,
        direction: &'static str,
        name: String,
    },
    #[error("`{0}` is a reserved shared-header name")]
    ReservedName(String),
}

/// Identifiers injected by the shared specification header; user IO
/// declarations and resource uniform names may not collide with these.
pub const RESERVED_NAMES: &[&str] = &[
    "resolution",
    "elapsed_time",
    "frame_index",
    "fragColor",
    "FrameUniforms",
    "map_sampler",
];

/// Per-program registry of stage IO declarations.
///
/// Location assignment is positional: the Nth variable declared for a given
/// (stage, direction) pair gets `location = N`.
#[derive(Debug, Default, Clone)]
pub struct IoRegistry {
    variables: Vec<IoVariable>,
}

impl IoRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a stage IO variable.
    ///
    /// Fails with [`IoDeclError::DuplicateIoVariable`] when the same
    /// (stage, direction, name) triple was already declared and with
    /// [`IoDeclError::ReservedName`] when the name belongs to the shared
    /// header.
    pub fn declare(&mut self, var: IoVariable) -> Result<(), IoDeclError> {
        if RESERVED_NAMES.contains(&var.name.as_str()) {
            return Err(IoDeclError::ReservedName(var.name));
        }
        if self
            .variables
            .iter()
            .any(|v| v.stage == var.stage && v.direction == var.direction && v.name == var.name)
        {
            return Err(IoDeclError::DuplicateIoVariable {
                stage: var.stage.name(),
                direction: var.direction.keyword(),
                name: var.name,
            });
        }
        self.variables.push(var);
        Ok(())
    }

    /// Declare every variable in `vars`, in order.
    pub fn declare_all(&mut self, vars: impl IntoIterator<Item = IoVariable>) -> Result<(), IoDeclError> {
        for var in vars {
            self.declare(var)?;
        }
        Ok(())
    }

    /// All declared variables in declaration order.
    pub fn variables(&self) -> &[IoVariable] {
        &self.variables
    }

    /// Variables for one (stage, direction) pair, paired with their assigned
    /// locations, in declaration order.
    pub fn stage_io(&self, stage: Stage, direction: Direction) -> Vec<(u32, &IoVariable)> {
        self.variables
            .iter()
            .filter(|v| v.stage == stage && v.direction == direction)
            .enumerate()
            .map(|(i, v)| (i as u32, v))
            .collect()
    }

    /// Number of vertex-stage inputs, i.e. the declared attribute count.
    pub fn vertex_attribute_count(&self) -> usize {
        self.variables
            .iter()
            .filter(|v| v.stage == Stage::Vertex && v.direction == Direction::In)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declaration_order_assigns_locations() {
        let mut io = IoRegistry::new();
        io.declare(IoVariable::new(Stage::Vertex, Direction::In, GlslType::Vec2, "position"))
            .unwrap();
        io.declare(IoVariable::new(Stage::Vertex, Direction::In, GlslType::Float, "pitch"))
            .unwrap();
        io.declare(IoVariable::new(Stage::Vertex, Direction::Out, GlslType::Vec2, "v_uv"))
            .unwrap();

        let ins = io.stage_io(Stage::Vertex, Direction::In);
        assert_eq!(ins.len(), 2);
        assert_eq!(ins[0].0, 0);
        assert_eq!(ins[0].1.name, "position");
        assert_eq!(ins[1].0, 1);
        assert_eq!(ins[1].1.name, "pitch");

        let outs = io.stage_io(Stage::Vertex, Direction::Out);
        assert_eq!(outs[0].0, 0);
        assert_eq!(outs[0].1.name, "v_uv");
    }

    #[test]
    fn test_duplicate_same_stage_direction_fails() {
        let mut io = IoRegistry::new();
        io.declare(IoVariable::new(Stage::Vertex, Direction::In, GlslType::Vec2, "position"))
            .unwrap();
        let err = io
            .declare(IoVariable::new(Stage::Vertex, Direction::In, GlslType::Vec4, "position"))
            .unwrap_err();
        assert!(matches!(err, IoDeclError::DuplicateIoVariable { .. }));
    }

    #[test]
    fn test_same_name_different_stage_or_direction_is_fine() {
        let mut io = IoRegistry::new();
        io.declare(IoVariable::new(Stage::Vertex, Direction::Out, GlslType::Vec2, "v_uv"))
            .unwrap();
        io.declare(IoVariable::new(Stage::Fragment, Direction::In, GlslType::Vec2, "v_uv"))
            .unwrap();
        assert_eq!(io.variables().len(), 2);
    }

    #[test]
    fn test_reserved_names_rejected() {
        let mut io = IoRegistry::new();
        for name in ["resolution", "elapsed_time", "frame_index", "fragColor"] {
            let err = io
                .declare(IoVariable::new(Stage::Fragment, Direction::In, GlslType::Float, name))
                .unwrap_err();
            assert!(matches!(err, IoDeclError::ReservedName(_)), "{name}");
        }
    }

    #[test]
    fn test_integer_io_is_flat_by_default() {
        let var = IoVariable::new(Stage::Fragment, Direction::In, GlslType::Int, "channel");
        assert!(var.flat);
        let var = IoVariable::new(Stage::Fragment, Direction::In, GlslType::Float, "velocity");
        assert!(!var.flat);
        assert!(var.flat().flat);
    }

    #[test]
    fn test_vertex_attribute_count() {
        let mut io = IoRegistry::new();
        io.declare_all([
            IoVariable::new(Stage::Vertex, Direction::In, GlslType::Vec2, "position"),
            IoVariable::new(Stage::Vertex, Direction::In, GlslType::Vec2, "size"),
            IoVariable::new(Stage::Vertex, Direction::Out, GlslType::Vec2, "v_uv"),
        ])
        .unwrap();
        assert_eq!(io.vertex_attribute_count(), 2);
    }
}
