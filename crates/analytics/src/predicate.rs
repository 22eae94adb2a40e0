use datafusion::prelude::{Expr, ident, lit};
use serde_json::Value;
use streaming::filter::{FilterPredicate, FilterSet};

use crate::sql::{ColumnAllowList, SqlError};

/// AND of every active predicate, or `None` when no filter is set.
///
/// Field names are resolved against `columns` first, so a typo is an error
/// instead of a silently empty result.
pub fn filter_expr(filters: &FilterSet, columns: &ColumnAllowList) -> Result<Option<Expr>, SqlError> {
    let mut combined: Option<Expr> = None;
    for predicate in filters.predicates() {
        let expr = predicate_expr(predicate, columns)?;
        combined = Some(match combined {
            Some(acc) => acc.and(expr),
            None => expr,
        });
    }
    Ok(combined)
}

fn predicate_expr(predicate: &FilterPredicate, columns: &ColumnAllowList) -> Result<Expr, SqlError> {
    let column = ident(columns.resolve(predicate.field())?);
    Ok(match predicate {
        FilterPredicate::Range { min, max, .. } => column.between(lit(*min), lit(*max)),
        FilterPredicate::Categorical { values, .. } => {
            column.in_list(values.iter().filter_map(value_literal).collect(), false)
        }
    })
}

fn value_literal(value: &Value) -> Option<Expr> {
    match value {
        Value::String(s) => Some(lit(s.clone())),
        Value::Bool(b) => Some(lit(*b)),
        Value::Number(n) => n
            .as_i64()
            .map(lit)
            .or_else(|| n.as_f64().map(lit)),
        _ => None,
    }
}
