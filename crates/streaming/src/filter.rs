use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FilterError {
    #[error("filter field name is empty")]
    EmptyField,
    #[error("range filter on `{field}` has non-finite bounds")]
    NonFiniteBound { field: String },
    #[error("range filter on `{field}` has min {min} above max {max}")]
    InvertedRange { field: String, min: f64, max: f64 },
    #[error("categorical filter on `{field}` has no values")]
    NoValues { field: String },
    #[error("categorical filter on `{field}` accepts only strings, numbers and booleans")]
    UnsupportedValue { field: String },
}

/// A predicate published by another component.
///
/// Serialized without a tag: `{field, min, max}` is a range and
/// `{field, values}` is a categorical match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterPredicate {
    Range { field: String, min: f64, max: f64 },
    Categorical { field: String, values: Vec<Value> },
}

impl FilterPredicate {
    pub fn range(field: impl Into<String>, min: f64, max: f64) -> Self {
        FilterPredicate::Range {
            field: field.into(),
            min,
            max,
        }
    }

    pub fn categorical(field: impl Into<String>, values: Vec<Value>) -> Self {
        FilterPredicate::Categorical {
            field: field.into(),
            values,
        }
    }

    pub fn field(&self) -> &str {
        match self {
            FilterPredicate::Range { field, .. } | FilterPredicate::Categorical { field, .. } => {
                field
            }
        }
    }

    pub fn validate(&self) -> Result<(), FilterError> {
        if self.field().trim().is_empty() {
            return Err(FilterError::EmptyField);
        }
        match self {
            FilterPredicate::Range { field, min, max } => {
                if !min.is_finite() || !max.is_finite() {
                    return Err(FilterError::NonFiniteBound {
                        field: field.clone(),
                    });
                }
                if min > max {
                    return Err(FilterError::InvertedRange {
                        field: field.clone(),
                        min: *min,
                        max: *max,
                    });
                }
            }
            FilterPredicate::Categorical { field, values } => {
                if values.is_empty() {
                    return Err(FilterError::NoValues {
                        field: field.clone(),
                    });
                }
                if values
                    .iter()
                    .any(|v| !(v.is_string() || v.is_number() || v.is_boolean()))
                {
                    return Err(FilterError::UnsupportedValue {
                        field: field.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Active predicates keyed by the component that published them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterSet {
    by_source: BTreeMap<String, FilterPredicate>,
}

impl FilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the source's predicate. Returns `false` when nothing changed.
    pub fn set(
        &mut self,
        source: impl Into<String>,
        predicate: FilterPredicate,
    ) -> Result<bool, FilterError> {
        predicate.validate()?;
        let source = source.into();
        if self.by_source.get(&source) == Some(&predicate) {
            return Ok(false);
        }
        self.by_source.insert(source, predicate);
        Ok(true)
    }

    /// Removes the source's predicate; `false` when it had none.
    pub fn clear(&mut self, source: &str) -> bool {
        self.by_source.remove(source).is_some()
    }

    pub fn get(&self, source: &str) -> Option<&FilterPredicate> {
        self.by_source.get(source)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FilterPredicate)> {
        self.by_source.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn predicates(&self) -> impl Iterator<Item = &FilterPredicate> {
        self.by_source.values()
    }

    pub fn len(&self) -> usize {
        self.by_source.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_source.is_empty()
    }
}
