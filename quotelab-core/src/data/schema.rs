use polars::prelude::*;

use crate::domain::MAX_DEPTH_LEVELS;

pub const KIND: &str = "kind";
pub const INSTRUMENT_CODE: &str = "instrument_code";
pub const EVENT_TIME: &str = "event_time";
pub const FLAG: &str = "flag";
pub const PRICE: &str = "price";
pub const LAST_VOLUME: &str = "last_volume";
pub const CUMULATIVE_VOLUME: &str = "cumulative_volume";
pub const BID_COUNT: &str = "bid_count";
pub const ASK_COUNT: &str = "ask_count";

/// Storage time unit for `event_time`.
pub const EVENT_TIME_UNIT: TimeUnit = TimeUnit::Microseconds;

/// `bid3_price`, `ask1_volume`, ... (`level` is 1-based).
pub fn level_price_column(side: &str, level: usize) -> String {
    format!("{side}{level}_price")
}

pub fn level_volume_column(side: &str, level: usize) -> String {
    format!("{side}{level}_volume")
}

/// Expected schema for instrument-day event files
pub struct EventSchema;

impl EventSchema {
    /// Every column in output order.
    pub fn schema() -> Schema {
        let mut fields = vec![
            Field::new(KIND.into(), DataType::String),
            Field::new(INSTRUMENT_CODE.into(), DataType::String),
            Field::new(EVENT_TIME.into(), DataType::Datetime(EVENT_TIME_UNIT, None)),
            Field::new(FLAG.into(), DataType::UInt32),
            Field::new(PRICE.into(), DataType::Float64),
            Field::new(LAST_VOLUME.into(), DataType::UInt64),
            Field::new(CUMULATIVE_VOLUME.into(), DataType::UInt64),
            Field::new(BID_COUNT.into(), DataType::UInt32),
            Field::new(ASK_COUNT.into(), DataType::UInt32),
        ];
        for side in ["bid", "ask"] {
            for level in 1..=MAX_DEPTH_LEVELS {
                fields.push(Field::new(
                    level_price_column(side, level).into(),
                    DataType::Float64,
                ));
                fields.push(Field::new(
                    level_volume_column(side, level).into(),
                    DataType::UInt64,
                ));
            }
        }
        Schema::from_iter(fields)
    }

    pub fn column_names() -> Vec<String> {
        Self::schema()
            .iter_names()
            .map(|name| name.to_string())
            .collect()
    }

    /// Validate DataFrame against schema
    pub fn validate(df: &DataFrame) -> Result<(), SchemaError> {
        let expected = Self::schema();
        let actual = df.schema();

        for field in expected.iter_fields() {
            let actual_dtype = actual
                .get(field.name())
                .ok_or_else(|| SchemaError::MissingColumn(field.name().to_string()))?;
            if actual_dtype != field.dtype() {
                return Err(SchemaError::TypeMismatch {
                    column: field.name().to_string(),
                    expected: field.dtype().clone(),
                    actual: actual_dtype.clone(),
                });
            }
        }

        Ok(())
    }

    /// Like [`validate`](Self::validate) but collects every problem.
    pub fn diff(df: &DataFrame) -> Vec<SchemaError> {
        let actual = df.schema();
        Self::schema()
            .iter_fields()
            .filter_map(|field| match actual.get(field.name()) {
                None => Some(SchemaError::MissingColumn(field.name().to_string())),
                Some(dtype) if dtype != field.dtype() => Some(SchemaError::TypeMismatch {
                    column: field.name().to_string(),
                    expected: field.dtype().clone(),
                    actual: dtype.clone(),
                }),
                Some(_) => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchemaError {
    #[error("Missing required column: {0}")]
    MissingColumn(String),

    #[error("Type mismatch in column {column}: expected {expected:?}, got {actual:?}")]
    TypeMismatch {
        column: String,
        expected: DataType,
        actual: DataType,
    },
}

impl SchemaError {
    pub fn column(&self) -> &str {
        match self {
            SchemaError::MissingColumn(c) => c,
            SchemaError::TypeMismatch { column, .. } => column,
        }
    }
}
