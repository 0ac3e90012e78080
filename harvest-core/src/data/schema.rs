use crate::domain::{DataKind, FlowColumn};
use polars::prelude::*;

/// Canonical persisted schema per data kind.
pub struct CanonicalSchema;

/// Columns every artifact must carry, whatever its kind.
pub const REQUIRED_COLUMNS: [&str; 2] = ["date", "code"];

const KDATA_NUMERIC: [&str; 7] = [
    "open",
    "high",
    "low",
    "close",
    "preclose",
    "volume",
    "pct_change",
];

impl CanonicalSchema {
    /// Column names and dtypes in persisted order.
    pub fn fields(kind: DataKind) -> Vec<(&'static str, DataType)> {
        match kind {
            DataKind::MoneyFlow => {
                let mut fields = vec![("date", DataType::Date)];
                fields.extend(FlowColumn::ALL.iter().map(|c| (c.name(), DataType::Float64)));
                fields.push(("code", DataType::String));
                fields
            }
            DataKind::Kdata => {
                let mut fields = vec![("date", DataType::Date), ("code", DataType::String)];
                fields.extend(KDATA_NUMERIC.iter().map(|c| (*c, DataType::Float64)));
                fields
            }
        }
    }

    pub fn schema(kind: DataKind) -> Schema {
        Schema::from_iter(
            Self::fields(kind)
                .into_iter()
                .map(|(name, dtype)| Field::new(name.into(), dtype)),
        )
    }

    /// Check required columns exist and every canonical column that is
    /// present has the canonical dtype. Extra columns are rejected so drift
    /// is caught at load time rather than at merge time.
    pub fn validate(df: &DataFrame, kind: DataKind) -> Result<(), SchemaError> {
        let actual = df.schema();

        for name in REQUIRED_COLUMNS {
            if !actual.contains(name) {
                return Err(SchemaError::MissingColumn(name.to_string()));
            }
        }

        let expected = Self::schema(kind);
        for (name, dtype) in actual.iter() {
            let Some(want) = expected.get(name.as_str()) else {
                return Err(SchemaError::UnexpectedColumn(name.to_string()));
            };
            if want != dtype {
                return Err(SchemaError::TypeMismatch {
                    column: name.to_string(),
                    expected: want.clone(),
                    actual: dtype.clone(),
                });
            }
        }

        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("Missing required column: {0}")]
    MissingColumn(String),

    #[error("Unexpected column: {0}")]
    UnexpectedColumn(String),

    #[error("Type mismatch in column {column}: expected {expected:?}, got {actual:?}")]
    TypeMismatch {
        column: String,
        expected: DataType,
        actual: DataType,
    },
}
