//! Model body parsing
//!
//! Splits a model template into text segments and typed references:
//!
//! - `{{ ref('model') }}` / `{{ ref('package', 'model') }}` -> [`ModelRef`]
//! - `{{ source('namespace', 'table') }}` -> [`SourceRef`]
//! - `{{ config(materialized='table', unique_key='id') }}` -> [`ModelConfig`]
//!
//! Everything else (other expressions, `{% %}` blocks) is left as text for the
//! renderer. A `ref()` or `source()` call that is not a standalone expression
//! is rejected, so resolution never depends on what the renderer does.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Reference to another model by name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModelRef {
    pub name: String,
}

/// Reference to a raw source table
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceRef {
    pub namespace: String,
    pub table: String,
}

impl SourceRef {
    pub fn new(namespace: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            table: table.into(),
        }
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.table)
    }
}

/// A typed reference found in a body
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Reference {
    Model(ModelRef),
    Source(SourceRef),
}

impl Reference {
    pub fn model(name: impl Into<String>) -> Self {
        Self::Model(ModelRef { name: name.into() })
    }

    pub fn source(namespace: impl Into<String>, table: impl Into<String>) -> Self {
        Self::Source(SourceRef::new(namespace, table))
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Model(r) => write!(f, "ref('{}')", r.name),
            Self::Source(s) => write!(f, "source('{}', '{}')", s.namespace, s.table),
        }
    }
}

/// A piece of a parsed body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Template text (may still contain other Jinja)
    Text(String),

    /// A typed reference, substituted with a relation name at render time
    Ref(Reference),
}

/// Options declared with `{{ config(...) }}`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelConfig {
    pub materialized: Option<String>,
    pub unique_key: Option<Vec<String>>,
    pub schema: Option<String>,
    pub layer: Option<String>,
    /// Informational target of an assertion
    pub target: Option<String>,
    pub tags: Vec<String>,
}

impl ModelConfig {
    fn merge(&mut self, other: ModelConfig) {
        if other.materialized.is_some() {
            self.materialized = other.materialized;
        }
        if other.unique_key.is_some() {
            self.unique_key = other.unique_key;
        }
        if other.schema.is_some() {
            self.schema = other.schema;
        }
        if other.layer.is_some() {
            self.layer = other.layer;
        }
        if other.target.is_some() {
            self.target = other.target;
        }
        self.tags.extend(other.tags);
    }
}

/// Template parse error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("line {line}: {message}")]
pub struct TemplateError {
    pub message: String,
    pub line: usize,
}

impl TemplateError {
    fn at(source: &str, offset: usize, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            line: source[..offset].matches('\n').count() + 1,
        }
    }
}

/// Parsed model or assertion body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelBody {
    raw: String,
    segments: Vec<Segment>,
    config: ModelConfig,
}

impl ModelBody {
    /// Parse a template into segments, references and config
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut config = ModelConfig::default();
        let mut text = String::new();
        let mut start = 0;

        while let Some(open) = source[start..].find("{{") {
            let open_pos = start + open;
            let Some(close) = source[open_pos..].find("}}") else {
                return Err(TemplateError::at(source, open_pos, "unterminated '{{' expression"));
            };
            let close_pos = open_pos + close;

            text.push_str(&source[start..open_pos]);
            check_statements(source, &text, open_pos)?;

            let content = source[open_pos + 2..close_pos]
                .trim()
                .trim_start_matches('-')
                .trim_end_matches('-')
                .trim();

            match parse_call(content) {
                Some((name, args)) if name == "ref" => {
                    let reference = ref_from_args(&args)
                        .ok_or_else(|| TemplateError::at(source, open_pos, format!("invalid ref(): {}", content)))?;
                    flush_text(&mut segments, &mut text);
                    segments.push(Segment::Ref(reference));
                }
                Some((name, args)) if name == "source" => {
                    let reference = source_from_args(&args)
                        .ok_or_else(|| TemplateError::at(source, open_pos, format!("invalid source(): {}", content)))?;
                    flush_text(&mut segments, &mut text);
                    segments.push(Segment::Ref(reference));
                }
                Some((name, args)) if name == "config" => {
                    let parsed = config_from_args(&args)
                        .map_err(|m| TemplateError::at(source, open_pos, m))?;
                    config.merge(parsed);
                }
                _ => {
                    if mentions_reference(content) {
                        return Err(TemplateError::at(
                            source,
                            open_pos,
                            "ref() and source() must be used as standalone {{ }} expressions",
                        ));
                    }
                    text.push_str(&source[open_pos..close_pos + 2]);
                }
            }

            start = close_pos + 2;
        }

        text.push_str(&source[start..]);
        check_statements(source, &text, source.len())?;
        flush_text(&mut segments, &mut text);

        Ok(Self {
            raw: source.to_string(),
            segments,
            config,
        })
    }

    /// Original template text
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// All references in order of appearance
    pub fn references(&self) -> impl Iterator<Item = &Reference> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Ref(r) => Some(r),
            Segment::Text(_) => None,
        })
    }

    /// Names of referenced models, in order of appearance
    pub fn model_refs(&self) -> Vec<&str> {
        self.references()
            .filter_map(|r| match r {
                Reference::Model(m) => Some(m.name.as_str()),
                Reference::Source(_) => None,
            })
            .collect()
    }

    /// Referenced sources, in order of appearance
    pub fn source_refs(&self) -> Vec<&SourceRef> {
        self.references()
            .filter_map(|r| match r {
                Reference::Source(s) => Some(s),
                Reference::Model(_) => None,
            })
            .collect()
    }
}

fn flush_text(segments: &mut Vec<Segment>, text: &mut String) {
    if !text.is_empty() {
        segments.push(Segment::Text(std::mem::take(text)));
    }
}

/// Reject references hidden inside `{% %}` statements of pending text
fn check_statements(source: &str, text: &str, offset: usize) -> Result<(), TemplateError> {
    let mut start = 0;
    while let Some(open) = text[start..].find("{%") {
        let open_pos = start + open;
        let close_pos = text[open_pos..]
            .find("%}")
            .map(|c| open_pos + c)
            .unwrap_or(text.len());
        if mentions_reference(&text[open_pos + 2..close_pos]) {
            return Err(TemplateError::at(
                source,
                offset,
                "ref() and source() cannot be used inside {% %} statements",
            ));
        }
        start = close_pos.min(text.len().saturating_sub(1)) + 1;
        if start >= text.len() {
            break;
        }
    }
    Ok(())
}

fn mentions_reference(content: &str) -> bool {
    ["ref", "source"].iter().any(|func| {
        content.match_indices(func).any(|(pos, _)| {
            let before = content[..pos].chars().next_back();
            let boundary = before.map_or(true, |c| !(c.is_alphanumeric() || c == '_'));
            boundary && content[pos + func.len()..].trim_start().starts_with('(')
        })
    })
}

/// A call argument
#[derive(Debug, Clone, PartialEq, Eq)]
enum ArgValue {
    Str(String),
    List(Vec<String>),
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Arg {
    Positional(ArgValue),
    Keyword(String, ArgValue),
}

/// Parse `name(arg, key=value, ...)`; None if the content is not a single call
fn parse_call(content: &str) -> Option<(String, Vec<Arg>)> {
    let paren = content.find('(')?;
    let name = content[..paren].trim();
    if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return None;
    }
    let inner = content[paren + 1..].trim_end().strip_suffix(')')?;

    let mut args = Vec::new();
    for part in split_top_level(inner)? {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        match split_keyword(part) {
            Some((key, value)) => args.push(Arg::Keyword(key.to_string(), parse_value(value)?)),
            None => args.push(Arg::Positional(parse_value(part)?)),
        }
    }
    Some((name.to_string(), args))
}

/// Split on commas outside quotes and brackets
fn split_top_level(inner: &str) -> Option<Vec<&str>> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut last = 0;

    for (i, c) in inner.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '\'' | '"' => quote = Some(c),
                '[' | '(' => depth += 1,
                ']' | ')' => depth -= 1,
                ',' if depth == 0 => {
                    parts.push(&inner[last..i]);
                    last = i + 1;
                }
                _ => {}
            },
        }
        if depth < 0 {
            return None;
        }
    }
    if quote.is_some() || depth != 0 {
        return None;
    }
    parts.push(&inner[last..]);
    Some(parts)
}

fn split_keyword(part: &str) -> Option<(&str, &str)> {
    let eq = part.find('=')?;
    let key = part[..eq].trim();
    if key.is_empty() || !key.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return None;
    }
    Some((key, part[eq + 1..].trim()))
}

fn parse_value(text: &str) -> Option<ArgValue> {
    let text = text.trim();
    if let Some(s) = string_literal(text) {
        return Some(ArgValue::Str(s.to_string()));
    }
    if let Some(inner) = text.strip_prefix('[').and_then(|t| t.strip_suffix(']')) {
        let items = split_top_level(inner)?
            .into_iter()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| string_literal(s).map(str::to_string))
            .collect::<Option<Vec<_>>>()?;
        return Some(ArgValue::List(items));
    }
    Some(ArgValue::Other(text.to_string()))
}

/// Extract string literal from quoted string (single or double quotes)
fn string_literal(s: &str) -> Option<&str> {
    let trimmed = s.trim();
    trimmed
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .or_else(|| trimmed.strip_prefix('"').and_then(|s| s.strip_suffix('"')))
}

fn positional_strings(args: &[Arg]) -> Option<Vec<&str>> {
    args.iter()
        .map(|a| match a {
            Arg::Positional(ArgValue::Str(s)) => Some(s.as_str()),
            _ => None,
        })
        .collect()
}

fn ref_from_args(args: &[Arg]) -> Option<Reference> {
    match positional_strings(args)?.as_slice() {
        // ref('model') or ref('package', 'model')
        [model] | [_, model] if !model.is_empty() => Some(Reference::model(*model)),
        _ => None,
    }
}

fn source_from_args(args: &[Arg]) -> Option<Reference> {
    match positional_strings(args)?.as_slice() {
        [namespace, table] if !namespace.is_empty() && !table.is_empty() => {
            Some(Reference::source(*namespace, *table))
        }
        _ => None,
    }
}

fn config_from_args(args: &[Arg]) -> Result<ModelConfig, String> {
    let mut config = ModelConfig::default();

    for arg in args {
        let Arg::Keyword(key, value) = arg else {
            return Err("config() only accepts keyword arguments".to_string());
        };

        let as_string = || match value {
            ArgValue::Str(s) => Ok(s.clone()),
            _ => Err(format!("config({}=...) expects a string", key)),
        };
        let as_list = || match value {
            ArgValue::Str(s) => Ok(vec![s.clone()]),
            ArgValue::List(items) => Ok(items.clone()),
            ArgValue::Other(_) => Err(format!("config({}=...) expects a string or list", key)),
        };

        match key.as_str() {
            "materialized" => config.materialized = Some(as_string()?),
            "unique_key" => config.unique_key = Some(as_list()?),
            "schema" => config.schema = Some(as_string()?),
            "layer" => config.layer = Some(as_string()?),
            "target" => config.target = Some(as_string()?),
            "tags" => config.tags = as_list()?,
            // Unknown keys are tolerated for forward compatibility
            _ => {}
        }
    }

    Ok(config)
}
