//! Pragma directive scanning for shader sources.
//!
//! Resource mappings are embedded in authored fragment sources as
//! `#pragma map name=kind:path[:WxH]` lines. Scanning runs before any GPU
//! compilation and is a pure text transform: directive lines are stripped
//! from the returned source (the GLSL compiler never sees them) while their
//! relative order is preserved so uniform binding order stays deterministic.

use std::path::PathBuf;

/// Errors produced while scanning directives.
#[derive(Debug, thiserror::Error)]
pub enum PragmaError {
    #[error("malformed directive on line {line}: {reason}")]
    MalformedDirective { line: usize, reason: String },
}

/// What a mapped resource resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// A 2-D texture decoded from an image file.
    Image,
    /// A nested fragment shader rendered offscreen and sampled as a texture.
    SubShader,
    /// An offscreen scratch target with no producer of its own.
    RenderTarget,
}

impl ResourceKind {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "image" => Some(Self::Image),
            "shader" => Some(Self::SubShader),
            "render_target" => Some(Self::RenderTarget),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::SubShader => "shader",
            Self::RenderTarget => "render_target",
        }
    }
}

/// One parsed `#pragma map` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    /// Uniform name the resource is exposed under.
    pub name: String,
    pub kind: ResourceKind,
    pub path: PathBuf,
    /// Declared resolution, if the directive carried a `WxH` suffix.
    pub resolution: Option<(u32, u32)>,
}

/// Scan `source` for map directives.
///
/// Returns the source with all directive lines removed plus the directives
/// in their original order. Scanning a source that carries no directives
/// returns it unchanged, so the transform is idempotent.
pub fn parse(source: &str) -> Result<(String, Vec<Directive>), PragmaError> {
    let mut cleaned = String::with_capacity(source.len());
    let mut directives: Vec<Directive> = Vec::new();

    for (idx, line) in source.lines().enumerate() {
        let line_no = idx + 1;
        match line.trim_start().strip_prefix("#pragma map ") {
            Some(body) => {
                let directive = parse_map_body(body.trim(), line_no)?;
                if directives.iter().any(|d| d.name == directive.name) {
                    return Err(PragmaError::MalformedDirective {
                        line: line_no,
                        reason: format!("duplicate uniform name `{}`", directive.name),
                    });
                }
                directives.push(directive);
            }
            None => {
                cleaned.push_str(line);
                cleaned.push('\n');
            }
        }
    }

    // lines() swallows a missing trailing newline; put the output back the
    // way the input ended so a clean source round-trips byte-for-byte.
    if !source.ends_with('\n') && cleaned.ends_with('\n') {
        cleaned.pop();
    }

    Ok((cleaned, directives))
}

/// Parse the `name=kind:path[:WxH]` body of a map directive.
fn parse_map_body(body: &str, line: usize) -> Result<Directive, PragmaError> {
    let malformed = |reason: &str| PragmaError::MalformedDirective {
        line,
        reason: reason.to_string(),
    };

    let (name, rhs) = body
        .split_once('=')
        .ok_or_else(|| malformed("expected `name=kind:path`"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(malformed("empty uniform name"));
    }
    if !is_valid_uniform_name(name) {
        return Err(malformed(&format!("`{name}` is not a valid uniform name")));
    }

    let (kind, rest) = rhs
        .trim()
        .split_once(':')
        .ok_or_else(|| malformed("expected `kind:path` after `=`"))?;
    let kind = ResourceKind::parse(kind.trim())
        .ok_or_else(|| malformed(&format!("unrecognized resource kind `{}`", kind.trim())))?;

    // The optional resolution suffix is the last `:`-separated token; paths
    // themselves may not contain `:`.
    let (path, resolution) = match rest.rsplit_once(':') {
        Some((path, res)) => {
            let resolution = parse_resolution(res.trim())
                .ok_or_else(|| malformed(&format!("invalid resolution `{}`", res.trim())))?;
            (path.trim(), Some(resolution))
        }
        None => (rest.trim(), None),
    };
    if path.is_empty() {
        return Err(malformed("empty resource path"));
    }

    Ok(Directive {
        name: name.to_string(),
        kind,
        path: PathBuf::from(path),
        resolution,
    })
}

fn parse_resolution(s: &str) -> Option<(u32, u32)> {
    let (w, h) = s.split_once('x')?;
    let w: u32 = w.trim().parse().ok()?;
    let h: u32 = h.trim().parse().ok()?;
    if w == 0 || h == 0 {
        return None;
    }
    Some((w, h))
}

fn is_valid_uniform_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_image_directive() {
        let source = "#pragma map bg=image:bg.png:640x480\nvoid main(){fragColor=texture(bg,uv);}";
        let (cleaned, directives) = parse(source).unwrap();

        assert_eq!(cleaned, "void main(){fragColor=texture(bg,uv);}");
        assert_eq!(directives.len(), 1);
        assert_eq!(directives[0].name, "bg");
        assert_eq!(directives[0].kind, ResourceKind::Image);
        assert_eq!(directives[0].path, PathBuf::from("bg.png"));
        assert_eq!(directives[0].resolution, Some((640, 480)));
    }

    #[test]
    fn test_parse_preserves_directive_order() {
        let source = "\
#pragma map first=image:a.png
#pragma map second=shader:sub.frag
#pragma map third=render_target:scratch:256x256
void main(){}";
        let (_, directives) = parse(source).unwrap();
        let names: Vec<&str> = directives.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["first", "second", "third"]);
        assert_eq!(directives[1].kind, ResourceKind::SubShader);
        assert_eq!(directives[2].kind, ResourceKind::RenderTarget);
        assert_eq!(directives[2].resolution, Some((256, 256)));
    }

    #[test]
    fn test_parse_is_idempotent_on_clean_source() {
        let source = "#pragma map bg=image:bg.png\nvoid main(){}\n";
        let (cleaned, directives) = parse(source).unwrap();
        assert_eq!(directives.len(), 1);

        let (cleaned_again, none) = parse(&cleaned).unwrap();
        assert_eq!(cleaned_again, cleaned);
        assert!(none.is_empty());
    }

    #[test]
    fn test_parse_without_trailing_newline_round_trips() {
        let source = "void main(){}";
        let (cleaned, directives) = parse(source).unwrap();
        assert_eq!(cleaned, source);
        assert!(directives.is_empty());
    }

    #[test]
    fn test_directives_stripped_mid_source() {
        let source = "float a;\n#pragma map t=image:t.png\nfloat b;\n";
        let (cleaned, directives) = parse(source).unwrap();
        assert_eq!(cleaned, "float a;\nfloat b;\n");
        assert_eq!(directives.len(), 1);
        assert!(!cleaned.contains("#pragma"));
    }

    #[test]
    fn test_unknown_kind_is_malformed() {
        let err = parse("#pragma map x=video:clip.mp4\n").unwrap_err();
        assert!(matches!(err, PragmaError::MalformedDirective { line: 1, .. }));
    }

    #[test]
    fn test_empty_name_is_malformed() {
        assert!(parse("#pragma map =image:a.png\n").is_err());
        assert!(parse("#pragma map 9lives=image:a.png\n").is_err());
    }

    #[test]
    fn test_duplicate_name_is_malformed() {
        let source = "#pragma map bg=image:a.png\n#pragma map bg=image:b.png\n";
        let err = parse(source).unwrap_err();
        match err {
            PragmaError::MalformedDirective { line, reason } => {
                assert_eq!(line, 2);
                assert!(reason.contains("duplicate"));
            }
        }
    }

    #[test]
    fn test_invalid_resolution_is_malformed() {
        assert!(parse("#pragma map bg=image:a.png:0x480\n").is_err());
        assert!(parse("#pragma map bg=image:a.png:640by480\n").is_err());
    }

    #[test]
    fn test_indented_directive_is_recognized() {
        let (cleaned, directives) = parse("    #pragma map bg=image:a.png\n").unwrap();
        assert!(cleaned.is_empty());
        assert_eq!(directives.len(), 1);
    }
}
