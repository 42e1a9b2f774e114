//! Model registry
//!
//! A flat name -> definition map. Declaration order is kept only as the
//! stable tie-breaker for scheduling.

use crate::error::ProjectError;
use crate::model::Model;
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: Vec<Model>,
    index: HashMap<String, usize>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a model, assigning its declaration index
    pub fn register(&mut self, mut model: Model) -> Result<(), ProjectError> {
        if self.index.contains_key(&model.name) {
            return Err(ProjectError::DuplicateModel {
                name: model.name,
                path: model.path,
            });
        }

        model.declaration_index = self.models.len();
        self.index.insert(model.name.clone(), self.models.len());
        self.models.push(model);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&Model, ProjectError> {
        self.index
            .get(name)
            .map(|&i| &self.models[i])
            .ok_or_else(|| ProjectError::UnknownModel(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// All models in declaration order
    pub fn all(&self) -> &[Model] {
        &self.models
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.models.iter().map(|m| m.name.as_str())
    }

    /// Declaration index of a registered model
    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}
