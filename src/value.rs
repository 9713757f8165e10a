use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::ColumnType;

/// One non-missing cell, as handed out by [`crate::output::Frame`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Value {
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Str(String),
}

impl Value {
    pub fn as_display(&self) -> String {
        match self {
            Value::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            Value::Int32(i) => i.to_string(),
            Value::Int64(i) => i.to_string(),
            Value::Float32(f) => format_float(f64::from(*f)),
            Value::Float64(f) => format_float(*f),
            Value::Str(s) => s.clone(),
        }
    }

    /// Narrowest lattice type that stores this value.
    pub fn column_type(&self) -> ColumnType {
        match self {
            Value::Bool(_) => ColumnType::Bool8,
            Value::Int32(_) => ColumnType::Int32Bare,
            Value::Int64(_) => ColumnType::Int64,
            Value::Float32(_) => ColumnType::Float32Hex,
            Value::Float64(_) => ColumnType::Float64,
            Value::Str(_) => ColumnType::String,
        }
    }
}

fn format_float(f: f64) -> String {
    if f.is_nan() {
        "NaN".to_string()
    } else if f.is_infinite() {
        if f > 0.0 { "Inf" } else { "-Inf" }.to_string()
    } else {
        f.to_string()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn displays_special_floats() {
        assert_eq!(Value::Float64(f64::NAN).as_display(), "NaN");
        assert_eq!(Value::Float64(f64::NEG_INFINITY).as_display(), "-Inf");
        assert_eq!(Value::Float64(2.5).as_display(), "2.5");
        assert_eq!(Value::Float32(3.0).as_display(), "3");
        assert_eq!(Value::Bool(true).to_string(), "TRUE");
    }
}
