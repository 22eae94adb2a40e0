use arrow::array::{Array, AsArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Int64Type, UInt64Type};
use arrow::error::ArrowError;

use crate::cell::CellId;

#[derive(Debug, thiserror::Error)]
pub enum ColumnError {
    #[error("column `{column}` has unsupported type {data_type} for {expected}")]
    UnsupportedType {
        column: String,
        data_type: DataType,
        expected: &'static str,
    },
    #[error("column `{0}` not found")]
    Missing(String),
    #[error(transparent)]
    Arrow(#[from] ArrowError),
}

/// Decodes a cell column into [`CellId`]s.
///
/// Accepts unsigned or signed 64-bit integers and hex text; nulls and
/// unparseable text become `None`.
pub fn cell_ids(column: &str, array: &dyn Array) -> Result<Vec<Option<CellId>>, ColumnError> {
    let out = match array.data_type() {
        DataType::UInt64 => array
            .as_primitive::<UInt64Type>()
            .iter()
            .map(|v| v.map(CellId::from_raw))
            .collect(),
        DataType::Int64 => array
            .as_primitive::<Int64Type>()
            .iter()
            .map(|v| v.filter(|x| *x >= 0).map(|x| CellId::from_raw(x as u64)))
            .collect(),
        DataType::Utf8 => array
            .as_string::<i32>()
            .iter()
            .map(|v| v.and_then(|s| s.parse().ok()))
            .collect(),
        DataType::LargeUtf8 => array
            .as_string::<i64>()
            .iter()
            .map(|v| v.and_then(|s| s.parse().ok()))
            .collect(),
        other => {
            return Err(ColumnError::UnsupportedType {
                column: column.to_string(),
                data_type: other.clone(),
                expected: "cell ids (uint64, int64 or hex utf8)",
            });
        }
    };
    Ok(out)
}

/// Decodes any integer column into non-negative `u64`s; negatives become `None`.
pub fn unsigned_ids(column: &str, array: &dyn Array) -> Result<Vec<Option<u64>>, ColumnError> {
    if !array.data_type().is_integer() {
        return Err(ColumnError::UnsupportedType {
            column: column.to_string(),
            data_type: array.data_type().clone(),
            expected: "integer ids",
        });
    }
    let widened = cast(array, &DataType::Int64)?;
    Ok(widened
        .as_primitive::<Int64Type>()
        .iter()
        .map(|v| v.filter(|x| *x >= 0).map(|x| x as u64))
        .collect())
}

/// Decodes a numeric column as `f64`, nulls preserved.
pub fn float_values(column: &str, array: &dyn Array) -> Result<Vec<Option<f64>>, ColumnError> {
    if !array.data_type().is_numeric() {
        return Err(ColumnError::UnsupportedType {
            column: column.to_string(),
            data_type: array.data_type().clone(),
            expected: "numeric values",
        });
    }
    let widened = cast(array, &DataType::Float64)?;
    Ok(widened
        .as_primitive::<arrow::datatypes::Float64Type>()
        .iter()
        .collect())
}
