//! Shader source declaration extraction.
//!
//! Backends and the import tool need the attribute and uniform declarations
//! out of GLSL-family source text to build parameter tables and bind
//! attribute locations. This is deliberately not a parser: a line-oriented
//! scan over global declarations is all the contract requires.

use crate::program::ParameterType;
use crate::vertex::VertexFormat;
use lazy_static::lazy_static;
use regex::Regex;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DeclarationKind {
    Attribute,
    Uniform,
}

#[derive(Clone, Debug)]
pub struct Declaration {
    pub kind: DeclarationKind,
    pub type_token: String,
    pub name: String,
    pub dim: u16,
}

lazy_static! {
    static ref DECLARATION: Regex = Regex::new(
        r"(?m)^\s*(attribute|uniform|in)\s+(?:(?:lowp|mediump|highp)\s+)?(\w+)\s+(\w+)\s*(?:\[\s*(\d+)\s*\])?\s*;"
    )
    .unwrap();
}

/// Extracts global attribute and uniform declarations from shader text.
/// `in` qualifiers count as attributes (GLSL 1.30+ vertex inputs).
pub fn extract_declarations(source: &str) -> Vec<Declaration> {
    let mut declarations = Vec::new();
    for captures in DECLARATION.captures_iter(source) {
        let kind = match &captures[1] {
            "uniform" => DeclarationKind::Uniform,
            _ => DeclarationKind::Attribute,
        };
        let dim = captures
            .get(4)
            .and_then(|dim| dim.as_str().parse::<u16>().ok())
            .unwrap_or(1);
        declarations.push(Declaration {
            kind,
            type_token: captures[2].to_owned(),
            name: captures[3].to_owned(),
            dim,
        });
    }
    declarations
}

/// Maps a GLSL type token to the attribute data format.
pub fn attribute_format(type_token: &str) -> Option<VertexFormat> {
    match type_token {
        "float" => Some(VertexFormat::Float),
        "vec2" => Some(VertexFormat::Float2),
        "vec3" => Some(VertexFormat::Float3),
        "vec4" => Some(VertexFormat::Float4),
        "int" | "uint" => Some(VertexFormat::Int),
        "ivec2" | "uvec2" => Some(VertexFormat::Int2),
        "ivec4" | "uvec4" => Some(VertexFormat::Int4),
        _ => None,
    }
}

/// Maps a GLSL type token to the program parameter type. Unknown tokens are
/// a hard error at program build.
pub fn parameter_type(type_token: &str) -> Option<ParameterType> {
    match type_token {
        "vec4" => Some(ParameterType::Float4),
        "ivec4" | "uvec4" => Some(ParameterType::Int4),
        "mat4" => Some(ParameterType::Matrix),
        "sampler2D" => Some(ParameterType::Texture),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VERTEX_SOURCE: &str = r#"
uniform mat4 transform_mvp;

attribute vec3 position;
attribute vec4 color;
in vec2 texcoord;

varying vec4 frag_color;

void main() {
    frag_color = color;
}
"#;

    #[test]
    fn extracts_attributes_and_uniforms() {
        let declarations = extract_declarations(VERTEX_SOURCE);
        assert_eq!(declarations.len(), 4);
        assert_eq!(declarations[0].kind, DeclarationKind::Uniform);
        assert_eq!(declarations[0].type_token, "mat4");
        assert_eq!(declarations[0].name, "transform_mvp");
        assert_eq!(declarations[1].name, "position");
        assert_eq!(declarations[1].kind, DeclarationKind::Attribute);
        assert_eq!(declarations[3].name, "texcoord");
        assert_eq!(declarations[3].kind, DeclarationKind::Attribute);
    }

    #[test]
    fn arrays_and_precision_qualifiers() {
        let declarations =
            extract_declarations("uniform lowp vec4 bones[16];\nuniform sampler2D tex;\n");
        assert_eq!(declarations[0].dim, 16);
        assert_eq!(declarations[0].type_token, "vec4");
        assert_eq!(declarations[1].type_token, "sampler2D");
    }

    #[test]
    fn local_declarations_are_ignored() {
        let declarations = extract_declarations("void main() {\n    vec4 tmp = vec4(0.0);\n}\n");
        assert!(declarations.is_empty());
    }

    #[test]
    fn type_mapping() {
        assert_eq!(attribute_format("vec3"), Some(VertexFormat::Float3));
        assert_eq!(parameter_type("mat4"), Some(ParameterType::Matrix));
        assert_eq!(parameter_type("mat3"), None);
    }
}
