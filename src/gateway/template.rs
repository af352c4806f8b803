//! HTTP path templates in the `google.api.http` style.
//!
//! Supported forms:
//!
//! ```text
//! /api/v1/memos                       literal segments
//! /api/v1/{name=memos/*}              variable bound to a sub-path
//! /api/v1/{memo.name=memos/*}         variable with a nested field path
//! /file/{name=attachments/*}/{filename}   `{field}` is shorthand for `{field=*}`
//! /api/v1/{name=users/*}:getStats     custom verb
//! ```

use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TemplateError {
    #[error("template must start with '/': {0}")]
    MissingSlash(String),

    #[error("unbalanced braces in template: {0}")]
    UnbalancedBraces(String),

    #[error("empty segment in template: {0}")]
    EmptySegment(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    /// One path segment
    Wildcard,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Variable {
    /// Dotted field path, e.g. `memo.name`
    field: String,
    start: usize,
    end: usize,
}

/// Compiled path template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    source: String,
    segments: Vec<Segment>,
    variables: Vec<Variable>,
    verb: Option<String>,
}

impl PathTemplate {
    pub fn parse(template: &str) -> Result<Self, TemplateError> {
        let rest = template
            .strip_prefix('/')
            .ok_or_else(|| TemplateError::MissingSlash(template.to_owned()))?;

        let (path, verb) = split_verb(rest);
        let mut segments = Vec::new();
        let mut variables = Vec::new();

        for part in split_outside_braces(path, template)? {
            if let Some(inner) = part.strip_prefix('{') {
                let inner = inner
                    .strip_suffix('}')
                    .ok_or_else(|| TemplateError::UnbalancedBraces(template.to_owned()))?;
                let (field, pattern) = inner.split_once('=').unwrap_or((inner, "*"));

                let start = segments.len();
                for piece in pattern.split('/') {
                    segments.push(parse_segment(piece, template)?);
                }
                variables.push(Variable {
                    field: field.to_owned(),
                    start,
                    end: segments.len(),
                });
            } else {
                segments.push(parse_segment(part, template)?);
            }
        }

        Ok(Self {
            source: template.to_owned(),
            segments,
            variables,
            verb: verb.map(str::to_owned),
        })
    }

    /// Match a request path, returning `(field, value)` bindings
    pub fn matches(&self, path: &str) -> Option<Vec<(String, String)>> {
        let rest = path.strip_prefix('/')?;
        let rest = match &self.verb {
            Some(verb) => rest.strip_suffix(verb.as_str())?.strip_suffix(':')?,
            None => rest,
        };

        let parts: Vec<&str> = rest.split('/').collect();
        if parts.len() != self.segments.len() {
            return None;
        }

        for (segment, part) in self.segments.iter().zip(&parts) {
            match segment {
                Segment::Literal(lit) if lit == part => {}
                Segment::Wildcard if !part.is_empty() => {}
                _ => return None,
            }
        }

        let bindings = self
            .variables
            .iter()
            .map(|var| {
                let value = parts[var.start..var.end]
                    .iter()
                    .map(|p| urlencoding::decode(p).map(|d| d.into_owned()).unwrap_or_else(|_| (*p).to_owned()))
                    .collect::<Vec<_>>()
                    .join("/");
                (var.field.clone(), value)
            })
            .collect();

        Some(bindings)
    }
}

impl fmt::Display for PathTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn parse_segment(piece: &str, template: &str) -> Result<Segment, TemplateError> {
    match piece {
        "" => Err(TemplateError::EmptySegment(template.to_owned())),
        "*" => Ok(Segment::Wildcard),
        lit => Ok(Segment::Literal(lit.to_owned())),
    }
}

/// Split off a trailing `:verb` that is not inside braces
fn split_verb(path: &str) -> (&str, Option<&str>) {
    let last_slash = path.rfind('/').map(|i| i + 1).unwrap_or(0);
    let last_close = path.rfind('}').map(|i| i + 1).unwrap_or(0);
    let tail_start = last_slash.max(last_close);
    match path[tail_start..].find(':') {
        Some(i) => (&path[..tail_start + i], Some(&path[tail_start + i + 1..])),
        None => (path, None),
    }
}

/// Split on `/`, keeping `{...}` groups whole
fn split_outside_braces<'a>(path: &'a str, template: &str) -> Result<Vec<&'a str>, TemplateError> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;

    for (i, c) in path.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| TemplateError::UnbalancedBraces(template.to_owned()))?
            }
            '/' if depth == 0 => {
                parts.push(&path[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(TemplateError::UnbalancedBraces(template.to_owned()));
    }
    parts.push(&path[start..]);
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bind(template: &str, path: &str) -> Option<Vec<(String, String)>> {
        PathTemplate::parse(template).unwrap().matches(path)
    }

    #[test]
    fn test_literal() {
        assert_eq!(bind("/api/v1/memos", "/api/v1/memos"), Some(vec![]));
        assert_eq!(bind("/api/v1/memos", "/api/v1/memo"), None);
        assert_eq!(bind("/api/v1/memos", "/api/v1/memos/1"), None);
    }

    #[test]
    fn test_variable_with_prefix() {
        assert_eq!(
            bind("/api/v1/{name=memos/*}", "/api/v1/memos/abc"),
            Some(vec![("name".into(), "memos/abc".into())])
        );
        assert_eq!(bind("/api/v1/{name=memos/*}", "/api/v1/users/abc"), None);
        assert_eq!(bind("/api/v1/{name=memos/*}", "/api/v1/memos/"), None);
    }

    #[test]
    fn test_multi_segment_and_nested_field() {
        assert_eq!(
            bind("/api/v1/{shortcut.name=users/*/shortcuts/*}", "/api/v1/users/1/shortcuts/s2"),
            Some(vec![("shortcut.name".into(), "users/1/shortcuts/s2".into())])
        );
    }

    #[test]
    fn test_shorthand_variable_and_decoding() {
        assert_eq!(
            bind("/file/{name=attachments/*}/{filename}", "/file/attachments/a1/my%20photo.png"),
            Some(vec![
                ("name".into(), "attachments/a1".into()),
                ("filename".into(), "my photo.png".into()),
            ])
        );
    }

    #[test]
    fn test_verb() {
        assert_eq!(
            bind("/api/v1/{name=users/*}:getStats", "/api/v1/users/7:getStats"),
            Some(vec![("name".into(), "users/7".into())])
        );
        assert_eq!(bind("/api/v1/{name=users/*}:getStats", "/api/v1/users/7"), None);
        assert_eq!(bind("/api/v1/users:search", "/api/v1/users:search"), Some(vec![]));
        assert_eq!(bind("/api/v1/users:search", "/api/v1/users"), None);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(PathTemplate::parse("api/v1"), Err(TemplateError::MissingSlash(_))));
        assert!(matches!(
            PathTemplate::parse("/api/{name=memos/*"),
            Err(TemplateError::UnbalancedBraces(_))
        ));
        assert!(matches!(PathTemplate::parse("/api//v1"), Err(TemplateError::EmptySegment(_))));
    }
}
