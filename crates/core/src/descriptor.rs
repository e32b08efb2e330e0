//! Query descriptors and the default chain parser.
//!
//! A textual query such as `cpu.take(3)` names a source pattern (`cpu`) and a
//! chain of operator calls applied to it. The core only looks at the pattern;
//! the operator chain is interpreted by the transform engine.

use std::{fmt, rc::Rc};

use itertools::Itertools;

use crate::{binder::ReplayContext, channel::Source};

/// One operator call in a descriptor chain, e.g. `take(3)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OpCall {
    pub name: String,
    pub args: Vec<String>,
}

impl fmt::Display for OpCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.args.iter().join(", "))
    }
}

/// Parsed representation of a query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Descriptor {
    text: String,
    pattern: String,
    ops: Vec<OpCall>,
}

impl Descriptor {
    pub fn new(text: impl Into<String>, pattern: impl Into<String>, ops: Vec<OpCall>) -> Self {
        Self {
            text: text.into(),
            pattern: pattern.into(),
            ops,
        }
    }

    /// The text this descriptor was parsed from.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Source pattern used to request a base stream.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn ops(&self) -> &[OpCall] {
        &self.ops
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.pattern)?;
        for op in &self.ops {
            write!(f, ".{op}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("empty descriptor")]
    Empty,
    #[error("descriptor `{0}` does not start with a source pattern")]
    MissingPattern(String),
    #[error("unexpected {found:?} at offset {offset} in `{text}`")]
    Unexpected {
        text: String,
        offset: usize,
        found: char,
    },
    #[error("missing operator name at offset {offset} in `{text}`")]
    EmptyOperator { text: String, offset: usize },
    #[error("operator at offset {offset} in `{text}` has no argument list")]
    MissingArguments { text: String, offset: usize },
    #[error("unterminated argument list at offset {offset} in `{text}`")]
    Unterminated { text: String, offset: usize },
}

/// Turns query text into a [`Descriptor`].
pub trait DescriptorParser {
    fn parse(&self, text: &str) -> Result<Descriptor, ParseError>;
}

impl<F> DescriptorParser for F
where
    F: Fn(&str) -> Result<Descriptor, ParseError>,
{
    fn parse(&self, text: &str) -> Result<Descriptor, ParseError> {
        self(text)
    }
}

/// Parses `pattern(.op(args))*` chains.
///
/// Arguments are comma separated and trimmed; nesting is not supported.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChainParser;

fn is_delimiter(c: char) -> bool {
    matches!(c, '.' | '(' | ')')
}

fn is_op_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-'
}

impl DescriptorParser for ChainParser {
    fn parse(&self, text: &str) -> Result<Descriptor, ParseError> {
        let src = text.trim();
        if src.is_empty() {
            return Err(ParseError::Empty);
        }

        let unexpected = |offset: usize| ParseError::Unexpected {
            text: src.to_owned(),
            offset,
            found: src[offset..].chars().next().unwrap_or_default(),
        };

        let pattern_end = src.find(is_delimiter).unwrap_or(src.len());
        let pattern = src[..pattern_end].trim();
        if pattern.is_empty() {
            return Err(ParseError::MissingPattern(src.to_owned()));
        }

        let mut ops = Vec::new();
        let mut pos = pattern_end;
        while pos < src.len() {
            if !src[pos..].starts_with('.') {
                return Err(unexpected(pos));
            }
            let name_start = pos + 1;
            let Some(open) = src[name_start..].find('(').map(|i| name_start + i) else {
                return Err(ParseError::MissingArguments {
                    text: src.to_owned(),
                    offset: name_start,
                });
            };
            let name = src[name_start..open].trim();
            if name.is_empty() {
                return Err(ParseError::EmptyOperator {
                    text: src.to_owned(),
                    offset: name_start,
                });
            }
            if let Some(bad) = src[name_start..open]
                .char_indices()
                .find(|(_, c)| !is_op_char(*c) && !c.is_whitespace())
            {
                return Err(unexpected(name_start + bad.0));
            }
            let Some(close) = src[open + 1..].find(')').map(|i| open + 1 + i) else {
                return Err(ParseError::Unterminated {
                    text: src.to_owned(),
                    offset: open,
                });
            };
            let raw_args = &src[open + 1..close];
            if let Some(nested) = raw_args.find('(') {
                return Err(unexpected(open + 1 + nested));
            }
            let args = if raw_args.trim().is_empty() {
                Vec::new()
            } else {
                raw_args.split(',').map(|a| a.trim().to_owned()).collect()
            };
            ops.push(OpCall {
                name: name.to_owned(),
                args,
            });

            pos = close + 1;
            let trailing = src[pos..].len() - src[pos..].trim_start().len();
            pos += trailing;
        }

        Ok(Descriptor::new(src, pattern, ops))
    }
}

/// Transform invoked directly on a channel, bypassing descriptor parsing.
pub type DirectTransform<T> =
    Rc<dyn Fn(Source<T>, &ReplayContext<T>) -> anyhow::Result<Source<T>>>;

/// A query handed to the binder.
pub enum Query<T> {
    /// Parsed with the configured [`DescriptorParser`].
    Text(String),
    /// Applied as-is to the channel bound under `key`.
    Direct {
        key: String,
        transform: DirectTransform<T>,
    },
}

impl<T> Query<T> {
    pub fn text(text: impl Into<String>) -> Self {
        Query::Text(text.into())
    }

    pub fn direct<F>(key: impl Into<String>, transform: F) -> Self
    where
        F: Fn(Source<T>, &ReplayContext<T>) -> anyhow::Result<Source<T>> + 'static,
    {
        Query::Direct {
            key: key.into(),
            transform: Rc::new(transform),
        }
    }

    /// Key the query's results are published under.
    pub fn key(&self) -> &str {
        match self {
            Query::Text(text) => text,
            Query::Direct { key, .. } => key,
        }
    }
}

impl<T> From<&str> for Query<T> {
    fn from(text: &str) -> Self {
        Query::text(text)
    }
}

impl<T> From<String> for Query<T> {
    fn from(text: String) -> Self {
        Query::Text(text)
    }
}

impl<T> Clone for Query<T> {
    fn clone(&self) -> Self {
        match self {
            Query::Text(text) => Query::Text(text.clone()),
            Query::Direct { key, transform } => Query::Direct {
                key: key.clone(),
                transform: transform.clone(),
            },
        }
    }
}

impl<T> fmt::Debug for Query<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Query::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Query::Direct { key, .. } => f.debug_struct("Direct").field("key", key).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<Descriptor, ParseError> {
        ChainParser.parse(text)
    }

    #[test]
    fn test_bare_pattern() {
        let d = parse("  cpu ").unwrap();
        assert_eq!(d.pattern(), "cpu");
        assert!(d.ops().is_empty());
        assert_eq!(d.text(), "cpu");
    }

    #[test]
    fn test_operator_chain() {
        // `load` has no argument list, so its name runs into the next call
        assert!(matches!(
            parse("host-1.load.skip(2)"),
            Err(ParseError::Unexpected { found: '.', .. })
        ));

        let d = parse("abc.rate().take( 3 ).merge(disk, x)").unwrap();
        assert_eq!(d.pattern(), "abc");
        assert_eq!(
            d.ops(),
            &[
                OpCall {
                    name: "rate".into(),
                    args: vec![]
                },
                OpCall {
                    name: "take".into(),
                    args: vec!["3".into()]
                },
                OpCall {
                    name: "merge".into(),
                    args: vec!["disk".into(), "x".into()]
                },
            ]
        );
        assert_eq!(d.to_string(), "abc.rate().take(3).merge(disk, x)");
    }

    #[test]
    fn test_malformed_descriptors() {
        assert_eq!(parse("   "), Err(ParseError::Empty));
        assert!(matches!(parse(".take(1)"), Err(ParseError::MissingPattern(_))));
        assert!(matches!(parse("a.(1)"), Err(ParseError::EmptyOperator { .. })));
        assert!(matches!(parse("a.take(1"), Err(ParseError::Unterminated { .. })));
        assert!(matches!(parse("a.take"), Err(ParseError::MissingArguments { .. })));
        assert!(matches!(
            parse("a(1)"),
            Err(ParseError::Unexpected { found: '(', .. })
        ));
        assert!(matches!(
            parse("a.take(1) x"),
            Err(ParseError::Unexpected { found: 'x', .. })
        ));
        assert!(matches!(
            parse("a.take(f(1))"),
            Err(ParseError::Unexpected { found: '(', .. })
        ));
    }

    #[test]
    fn test_query_keys() {
        let text: Query<u8> = "abc.take(1)".into();
        assert_eq!(text.key(), "abc.take(1)");
        let direct = Query::<u8>::direct("custom", |source, _| Ok(source));
        assert_eq!(direct.key(), "custom");
    }
}
