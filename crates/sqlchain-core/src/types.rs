//! Semantic column types.

/// The semantic type of a mapped field.
///
/// Dialects turn a `SqlType` plus an optional size into the concrete
/// column type of their backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlType {
    Boolean,
    SmallInt,
    Integer,
    BigInt,
    Real,
    Double,
    Decimal,
    Text,
    Blob,
    Timestamp,
    Json,

    /// Custom type name used verbatim
    Custom(&'static str),
}

/// Size used for text columns that carry no explicit size.
pub const DEFAULT_TEXT_SIZE: u32 = 255;

impl SqlType {
    /// Generic SQL spelling of this type.
    pub fn sql_name(&self, size: Option<u32>) -> String {
        match self {
            SqlType::Boolean => "BOOLEAN".to_string(),
            SqlType::SmallInt => "SMALLINT".to_string(),
            SqlType::Integer => "INTEGER".to_string(),
            SqlType::BigInt => "BIGINT".to_string(),
            SqlType::Real => "REAL".to_string(),
            SqlType::Double => "DOUBLE PRECISION".to_string(),
            SqlType::Decimal => "DECIMAL".to_string(),
            SqlType::Text => match size.unwrap_or(DEFAULT_TEXT_SIZE) {
                n if n > 0 && n < 65532 => format!("VARCHAR({})", n),
                _ => "VARCHAR(65532)".to_string(),
            },
            SqlType::Blob => "BLOB".to_string(),
            SqlType::Timestamp => "TIMESTAMP".to_string(),
            SqlType::Json => "JSON".to_string(),
            SqlType::Custom(name) => (*name).to_string(),
        }
    }

    /// Check if this type is an integer type.
    pub const fn is_integer(&self) -> bool {
        matches!(self, SqlType::SmallInt | SqlType::Integer | SqlType::BigInt)
    }

    /// Check if this type is text-based.
    pub const fn is_text(&self) -> bool {
        matches!(self, SqlType::Text)
    }
}
