//! Resource resolution for pragma-mapped shader inputs.
//!
//! [`ResourceMapper::resolve`] turns the directives scanned out of a shader
//! source into a [`ResourceTable`]: decoded image pixels, recursively parsed
//! sub-shader sources and scratch-target declarations, in directive order.
//! Sub-shader references form a DAG walked with an explicit visit stack, so
//! cycles and excessive depth are caught uniformly rather than by blowing the
//! call stack. No GPU work happens here; binding the table to a device is the
//! program builder's job.

use super::pragma::{self, Directive, PragmaError, ResourceKind};
use image::RgbaImage;
use std::path::{Path, PathBuf};

/// Default cap on nested sub-shader depth.
pub const DEFAULT_MAX_INCLUDE_DEPTH: usize = 8;

/// Errors produced while resolving resources.
#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error("resource not found: {0}")]
    ResourceNotFound(PathBuf),
    #[error("cyclic include: `{path}` at depth {depth}")]
    CyclicInclude { path: PathBuf, depth: usize },
    #[error("failed to decode image {path}: {source}")]
    ImageDecode {
        path: PathBuf,
        source: image::ImageError,
    },
    #[error(transparent)]
    Pragma(#[from] PragmaError),
}

/// A sub-shader source resolved into its cleaned body and its own resources.
#[derive(Debug, Clone)]
pub struct ResolvedShader {
    pub source_path: PathBuf,
    pub cleaned_source: String,
    pub table: ResourceTable,
}

/// Resolved payload of one directive.
#[derive(Debug, Clone)]
pub enum ResolvedKind {
    Image { pixels: RgbaImage },
    SubShader { shader: Box<ResolvedShader> },
    RenderTarget,
}

impl ResolvedKind {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Image { .. } => ResourceKind::Image,
            Self::SubShader { .. } => ResourceKind::SubShader,
            Self::RenderTarget => ResourceKind::RenderTarget,
        }
    }
}

/// One fully resolved resource, ready for GPU binding.
///
/// Lives as long as the program that references it; `uniform_name` is unique
/// within that program (enforced upstream by the pragma scanner).
#[derive(Debug, Clone)]
pub struct ResolvedResource {
    pub uniform_name: String,
    pub payload: ResolvedKind,
    pub source_path: PathBuf,
    pub declared_resolution: Option<(u32, u32)>,
}

/// Ordered resolved resources for one program.
///
/// Entry order is directive order; GPU binding indices follow it 1:1.
#[derive(Debug, Clone, Default)]
pub struct ResourceTable {
    entries: Vec<ResolvedResource>,
}

impl ResourceTable {
    pub fn entries(&self) -> &[ResolvedResource] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Uniform names in binding order.
    pub fn uniform_names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.uniform_name.as_str())
    }
}

/// Resolves directives against the filesystem.
pub struct ResourceMapper {
    root: PathBuf,
    max_depth: usize,
}

impl ResourceMapper {
    /// Create a mapper resolving relative paths against `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_depth: DEFAULT_MAX_INCLUDE_DEPTH,
        }
    }

    /// Override the sub-shader recursion cap.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Resolve `directives` into a table, recursing into sub-shaders.
    pub fn resolve(&self, directives: &[Directive]) -> Result<ResourceTable, ResourceError> {
        let mut stack = Vec::new();
        self.resolve_inner(directives, &mut stack)
    }

    fn resolve_inner(
        &self,
        directives: &[Directive],
        stack: &mut Vec<PathBuf>,
    ) -> Result<ResourceTable, ResourceError> {
        let mut entries = Vec::with_capacity(directives.len());
        for directive in directives {
            entries.push(self.resolve_one(directive, stack)?);
        }
        Ok(ResourceTable { entries })
    }

    fn resolve_one(
        &self,
        directive: &Directive,
        stack: &mut Vec<PathBuf>,
    ) -> Result<ResolvedResource, ResourceError> {
        let path = self.locate(&directive.path);
        let payload = match directive.kind {
            ResourceKind::Image => {
                let path = path.ok_or_else(|| {
                    ResourceError::ResourceNotFound(directive.path.clone())
                })?;
                ResolvedKind::Image {
                    pixels: load_image(&path, directive.resolution)?,
                }
            }
            ResourceKind::SubShader => {
                let path = path.ok_or_else(|| {
                    ResourceError::ResourceNotFound(directive.path.clone())
                })?;
                ResolvedKind::SubShader {
                    shader: Box::new(self.resolve_sub_shader(&path, stack)?),
                }
            }
            // Scratch targets have no backing file; the path is just a label.
            ResourceKind::RenderTarget => ResolvedKind::RenderTarget,
        };

        Ok(ResolvedResource {
            uniform_name: directive.name.clone(),
            payload,
            source_path: directive.path.clone(),
            declared_resolution: directive.resolution,
        })
    }

    fn resolve_sub_shader(
        &self,
        path: &Path,
        stack: &mut Vec<PathBuf>,
    ) -> Result<ResolvedShader, ResourceError> {
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        if stack.contains(&canonical) {
            return Err(ResourceError::CyclicInclude {
                path: path.to_path_buf(),
                depth: stack.len(),
            });
        }
        if stack.len() >= self.max_depth {
            return Err(ResourceError::CyclicInclude {
                path: path.to_path_buf(),
                depth: stack.len(),
            });
        }

        let raw = std::fs::read_to_string(path)
            .map_err(|_| ResourceError::ResourceNotFound(path.to_path_buf()))?;
        let (cleaned_source, directives) = pragma::parse(&raw)?;

        stack.push(canonical);
        let table = self.resolve_inner(&directives, stack);
        stack.pop();

        Ok(ResolvedShader {
            source_path: path.to_path_buf(),
            cleaned_source,
            table: table?,
        })
    }

    /// Resolve a directive path to an existing file, if any.
    fn locate(&self, path: &Path) -> Option<PathBuf> {
        if path.is_absolute() {
            return path.exists().then(|| path.to_path_buf());
        }
        let joined = self.root.join(path);
        joined.exists().then_some(joined)
    }
}

/// Decode an image, scaling to the declared resolution when one was given.
fn load_image(path: &Path, resolution: Option<(u32, u32)>) -> Result<RgbaImage, ResourceError> {
    let decoded = image::open(path)
        .map_err(|source| ResourceError::ImageDecode {
            path: path.to_path_buf(),
            source,
        })?
        .to_rgba8();

    match resolution {
        Some((w, h)) if (decoded.width(), decoded.height()) != (w, h) => Ok(
            image::imageops::resize(&decoded, w, h, image::imageops::FilterType::Triangle),
        ),
        _ => Ok(decoded),
    }
}
