//! Data-quality assertions
//!
//! An assertion is a query that returns the rows violating an invariant; it
//! passes iff the query returns nothing. Singular assertions are `.sql`
//! files. Generic column tests from `[[tests]]` expand into the same shape.

use crate::error::ProjectError;
use crate::template::ModelBody;
use dagwright_core::{GenericTestConfig, GenericTestKind};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq)]
pub struct Assertion {
    pub name: String,
    pub body: ModelBody,
    /// Informational: the model the assertion checks
    pub target_model: Option<String>,
    pub path: Option<PathBuf>,
}

impl Assertion {
    /// Create an assertion; the target defaults to `config(target=...)`,
    /// then to the first referenced model
    pub fn new(name: impl Into<String>, body: ModelBody) -> Self {
        let target_model = body
            .config()
            .target
            .clone()
            .or_else(|| body.model_refs().first().map(|s| s.to_string()));

        Self {
            name: name.into(),
            body,
            target_model,
            path: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Expand a generic column test into an assertion
    pub fn from_generic_test(test: &GenericTestConfig) -> Result<Self, ProjectError> {
        let model = &test.model;
        let column = &test.column;

        let sql = match test.kind {
            GenericTestKind::Unique => format!(
                "select {column} as unique_field, count(*) as n_records\n\
                 from {{{{ ref('{model}') }}}}\n\
                 where {column} is not null\n\
                 group by {column}\n\
                 having count(*) > 1\n"
            ),
            GenericTestKind::NotNull => format!(
                "select *\nfrom {{{{ ref('{model}') }}}}\nwhere {column} is null\n"
            ),
            GenericTestKind::AcceptedValues => {
                if test.values.is_empty() {
                    return Err(ProjectError::InvalidModel {
                        model: model.clone(),
                        message: format!("accepted_values test on '{}' needs at least one value", column),
                    });
                }
                let values = test
                    .values
                    .iter()
                    .map(|v| format!("'{}'", v.replace('\'', "''")))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!(
                    "select {column} as value_field, count(*) as n_records\n\
                     from {{{{ ref('{model}') }}}}\n\
                     where {column} is not null and {column} not in ({values})\n\
                     group by {column}\n"
                )
            }
            GenericTestKind::Relationships => {
                let (Some(to), Some(field)) = (&test.to, &test.field) else {
                    return Err(ProjectError::InvalidModel {
                        model: model.clone(),
                        message: format!("relationships test on '{}' needs `to` and `field`", column),
                    });
                };
                format!(
                    "select child.{column} as from_field\n\
                     from {{{{ ref('{model}') }}}} as child\n\
                     left join {{{{ ref('{to}') }}}} as parent\n\
                       on child.{column} = parent.{field}\n\
                     where child.{column} is not null\n\
                       and parent.{field} is null\n"
                )
            }
        };

        let body = ModelBody::parse(&sql).map_err(|e| ProjectError::InvalidModel {
            model: model.clone(),
            message: e.to_string(),
        })?;

        let mut assertion = Self::new(generic_test_name(test), body);
        assertion.target_model = Some(model.clone());
        Ok(assertion)
    }
}

/// `<kind>_<model>_<column>`
pub fn generic_test_name(test: &GenericTestConfig) -> String {
    format!("{}_{}_{}", test.kind.as_str(), test.model, test.column)
}
