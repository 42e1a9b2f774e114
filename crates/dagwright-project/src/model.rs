//! Model definitions

use crate::error::ProjectError;
use crate::template::ModelBody;
use dagwright_core::ProjectConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Position of a model in the warehouse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layer {
    Staging,
    Mart,
}

impl Layer {
    /// Layer for a directory or `layer=` value; anything unknown is a mart
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "staging" | "stg" => Self::Staging,
            _ => Self::Mart,
        }
    }

    /// Default schema, also the `[models.<layer>]` key
    pub fn default_schema(&self) -> &'static str {
        match self {
            Self::Staging => "staging",
            Self::Mart => "marts",
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Staging => write!(f, "staging"),
            Self::Mart => write!(f, "mart"),
        }
    }
}

/// How a model is materialized in the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Materialization {
    View,
    Table,
}

impl Materialization {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "view" => Some(Self::View),
            "table" | "incremental" => Some(Self::Table),
            _ => None,
        }
    }
}

impl fmt::Display for Materialization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::View => write!(f, "view"),
            Self::Table => write!(f, "table"),
        }
    }
}

/// Non-empty list of columns identifying a row
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UniqueKey(Vec<String>);

impl UniqueKey {
    pub fn new(columns: Vec<String>) -> Option<Self> {
        let columns: Vec<String> = columns
            .into_iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();
        if columns.is_empty() {
            None
        } else {
            Some(Self(columns))
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for UniqueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join(", "))
    }
}

/// A named transformation producing one relation
#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    pub name: String,
    pub layer: Layer,
    pub materialization: Materialization,
    pub unique_key: Option<UniqueKey>,
    pub schema: String,
    pub body: ModelBody,
    /// Source file, when loaded from disk
    pub path: Option<PathBuf>,
    /// Position in the registry; set on registration
    pub declaration_index: usize,
}

impl Model {
    /// Build a model from its parsed body
    ///
    /// `directory_layer` is the first directory under the model path, if any.
    pub fn from_body(
        name: impl Into<String>,
        body: ModelBody,
        directory_layer: Option<&str>,
        project: &ProjectConfig,
    ) -> Result<Self, ProjectError> {
        let name = name.into();
        let config = body.config().clone();

        let layer = config
            .layer
            .as_deref()
            .or(directory_layer)
            .map(Layer::from_name)
            .unwrap_or(Layer::Mart);

        // Layer defaults are keyed by directory name (`staging`, `marts`)
        let defaults = directory_layer
            .and_then(|dir| project.layer_defaults(dir))
            .or_else(|| project.layer_defaults(layer.default_schema()));

        let materialized = config
            .materialized
            .clone()
            .or_else(|| defaults.and_then(|d| d.materialized.clone()));
        let materialization = match materialized {
            Some(value) => Materialization::parse(&value).ok_or_else(|| ProjectError::InvalidModel {
                model: name.clone(),
                message: format!("unknown materialization '{}'", value),
            })?,
            None => Materialization::View,
        };

        let schema = config
            .schema
            .clone()
            .or_else(|| defaults.and_then(|d| d.schema.clone()))
            .unwrap_or_else(|| layer.default_schema().to_string());

        let unique_key = match config.unique_key.clone() {
            Some(columns) => Some(UniqueKey::new(columns).ok_or_else(|| ProjectError::InvalidModel {
                model: name.clone(),
                message: "unique_key must name at least one column".to_string(),
            })?),
            None => None,
        };

        if unique_key.is_some() && materialization == Materialization::View {
            return Err(ProjectError::InvalidModel {
                model: name,
                message: "unique_key is only valid for table materializations".to_string(),
            });
        }

        Ok(Self {
            name,
            layer,
            materialization,
            unique_key,
            schema,
            body,
            path: None,
            declaration_index: 0,
        })
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Whether rebuilds merge rows by key instead of replacing the table
    pub fn is_incremental(&self) -> bool {
        self.materialization == Materialization::Table && self.unique_key.is_some()
    }
}
