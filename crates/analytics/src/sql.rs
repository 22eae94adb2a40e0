//! Identifier validation and generated SQL.
//!
//! Every identifier that ends up inside generated SQL is first checked
//! against the columns of the current table and then double-quoted. User
//! query text is never spliced into generated statements.

use arrow::datatypes::{DataType, SchemaRef};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SqlError {
    #[error("unknown column `{name}`; available: {available}")]
    UnknownColumn { name: String, available: String },
    #[error("column `{name}` matches several columns that differ only in case")]
    AmbiguousColumn { name: String },
}

/// Letters, digits and underscores, not starting with a digit.
pub fn is_plain_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    s.len() <= 128 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Column names a query against the current table may reference.
#[derive(Debug, Clone)]
pub struct ColumnAllowList {
    schema: SchemaRef,
}

impl ColumnAllowList {
    pub fn new(schema: SchemaRef) -> Self {
        Self { schema }
    }

    /// Returns the schema's spelling of `name`.
    ///
    /// Exact matches win; otherwise a single case-insensitive match is accepted.
    pub fn resolve(&self, name: &str) -> Result<&str, SqlError> {
        let fields = self.schema.fields();
        if let Some(f) = fields.iter().find(|f| f.name() == name) {
            return Ok(f.name());
        }
        let mut matches = fields.iter().filter(|f| f.name().eq_ignore_ascii_case(name));
        match (matches.next(), matches.next()) {
            (Some(f), None) => Ok(f.name()),
            (Some(_), Some(_)) => Err(SqlError::AmbiguousColumn {
                name: name.to_string(),
            }),
            _ => Err(SqlError::UnknownColumn {
                name: name.to_string(),
                available: fields
                    .iter()
                    .map(|f| f.name().as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            }),
        }
    }

    pub fn data_type(&self, name: &str) -> Option<&DataType> {
        self.schema
            .field_with_name(name)
            .ok()
            .map(|f| f.data_type())
    }

    pub fn is_numeric(&self, name: &str) -> bool {
        self.data_type(name).is_some_and(|t| t.is_numeric())
    }
}

/// Summary query run when the user has not supplied one.
///
/// Always counts rows; adds mean/min/max when the value column exists and is
/// numeric.
pub fn default_metrics_query(table: &str, columns: &ColumnAllowList, value_column: &str) -> String {
    let table = quote_ident(table);
    match columns.resolve(value_column) {
        Ok(value) if columns.is_numeric(value) => {
            let v = quote_ident(value);
            format!(
                "SELECT COUNT(*) AS row_count, AVG({v}) AS mean_value, \
                 MIN({v}) AS min_value, MAX({v}) AS max_value FROM {table}"
            )
        }
        _ => format!("SELECT COUNT(*) AS row_count FROM {table}"),
    }
}

#[cfg(test)]
mod tests {
    use super::{ColumnAllowList, SqlError, default_metrics_query, is_plain_identifier, quote_ident};
    use arrow::datatypes::{DataType, Field, Schema};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn columns() -> ColumnAllowList {
        ColumnAllowList::new(Arc::new(Schema::new(vec![
            Field::new("hex", DataType::UInt64, false),
            Field::new("Value", DataType::Float64, true),
            Field::new("kind", DataType::Utf8, true),
        ])))
    }

    #[test]
    fn plain_identifiers() {
        assert!(is_plain_identifier("spatial_data"));
        assert!(is_plain_identifier("_x1"));
        assert!(!is_plain_identifier("1x"));
        assert!(!is_plain_identifier("a b"));
        assert!(!is_plain_identifier(""));
    }

    #[test]
    fn quoting_escapes_quotes() {
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn resolves_case_insensitively() {
        let cols = columns();
        assert_eq!(cols.resolve("value"), Ok("Value"));
        assert_eq!(cols.resolve("hex"), Ok("hex"));
        assert!(matches!(
            cols.resolve("valeu"),
            Err(SqlError::UnknownColumn { .. })
        ));
    }

    #[test]
    fn metrics_query_uses_value_column_when_numeric() {
        let cols = columns();
        assert_eq!(
            default_metrics_query("spatial_data", &cols, "value"),
            "SELECT COUNT(*) AS row_count, AVG(\"Value\") AS mean_value, \
             MIN(\"Value\") AS min_value, MAX(\"Value\") AS max_value FROM \"spatial_data\""
        );
        assert_eq!(
            default_metrics_query("spatial_data", &cols, "kind"),
            "SELECT COUNT(*) AS row_count FROM \"spatial_data\""
        );
    }
}
