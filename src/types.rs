//! Column type lattice and NA sentinel encodings.
//!
//! Every column carries one [`ColumnType`]. The variants are totally ordered
//! and a column may only ever move to a later variant while a file is being
//! read. [`ColumnType::Drop`] sits at the bottom but is sticky: scanning never
//! promotes a dropped column, only the caller can drop one.

use std::{fmt, str::FromStr};

use anyhow::anyhow;
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

pub const NA_BOOL8: i8 = i8::MIN;
pub const NA_INT32: i32 = i32::MIN;
pub const NA_INT64: i64 = i64::MIN;
pub const NA_FLOAT64_BITS: u64 = 0x7FF0_0000_0000_07A2;
pub const NA_FLOAT32_BITS: u32 = 0x7F80_07A2;
/// `LenOff::len` value marking a missing string; the offset is undefined.
pub const NA_STRING_LEN: i32 = i32::MIN;

pub fn na_float64() -> f64 {
    f64::from_bits(NA_FLOAT64_BITS)
}

pub fn na_float32() -> f32 {
    f32::from_bits(NA_FLOAT32_BITS)
}

pub fn is_na_float64(value: f64) -> bool {
    value.to_bits() == NA_FLOAT64_BITS
}

pub fn is_na_float32(value: f32) -> bool {
    value.to_bits() == NA_FLOAT32_BITS
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ColumnType {
    Drop = 0,
    Bool8 = 1,
    Int32Bare = 2,
    Int32Full = 3,
    Int64 = 4,
    Float32Hex = 5,
    Float64 = 6,
    Float64Ext = 7,
    Float64Hex = 8,
    String = 9,
}

/// Which of the three staging buffers a column's values live in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotClass {
    Skip,
    Wide,
    Narrow,
    Byte,
}

impl ColumnType {
    pub const ALL: [ColumnType; 10] = [
        ColumnType::Drop,
        ColumnType::Bool8,
        ColumnType::Int32Bare,
        ColumnType::Int32Full,
        ColumnType::Int64,
        ColumnType::Float32Hex,
        ColumnType::Float64,
        ColumnType::Float64Ext,
        ColumnType::Float64Hex,
        ColumnType::String,
    ];

    /// Narrowest type a scanned column starts from.
    pub const FIRST_SCANNED: ColumnType = ColumnType::Bool8;

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }

    /// Byte width of the column's slot in the row-major staging buffers.
    pub fn size(self) -> usize {
        match self {
            ColumnType::Drop => 0,
            ColumnType::Bool8 => 1,
            ColumnType::Int32Bare | ColumnType::Int32Full | ColumnType::Float32Hex => 4,
            ColumnType::Int64
            | ColumnType::Float64
            | ColumnType::Float64Ext
            | ColumnType::Float64Hex
            | ColumnType::String => 8,
        }
    }

    pub fn slot_class(self) -> SlotClass {
        match self.size() {
            0 => SlotClass::Skip,
            1 => SlotClass::Byte,
            4 => SlotClass::Narrow,
            _ => SlotClass::Wide,
        }
    }

    /// The type immediately after this one, or `None` at the top.
    pub fn next(self) -> Option<Self> {
        Self::from_code(self.code() + 1)
    }

    pub fn is_dropped(self) -> bool {
        self == ColumnType::Drop
    }

    pub fn is_string(self) -> bool {
        self == ColumnType::String
    }

    pub fn name(self) -> &'static str {
        match self {
            ColumnType::Drop => "drop",
            ColumnType::Bool8 => "bool",
            ColumnType::Int32Bare => "int32",
            ColumnType::Int32Full => "int32-full",
            ColumnType::Int64 => "int64",
            ColumnType::Float32Hex => "float32-hex",
            ColumnType::Float64 => "float64",
            ColumnType::Float64Ext => "float64-ext",
            ColumnType::Float64Hex => "float64-hex",
            ColumnType::String => "string",
        }
    }

    pub fn variants() -> Vec<&'static str> {
        Self::ALL.iter().map(|ty| ty.name()).collect()
    }
}

/// Least type at or above both inputs. A dropped column stays dropped.
pub fn promote(current: ColumnType, observed: ColumnType) -> ColumnType {
    if current.is_dropped() {
        return current;
    }
    current.max(observed)
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ColumnType {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace('_', "-");
        match normalized.as_str() {
            "drop" | "skip" | "null" => Ok(ColumnType::Drop),
            "bool" | "bool8" | "boolean" | "logical" => Ok(ColumnType::Bool8),
            "int32" | "int" | "integer" | "int32-bare" => Ok(ColumnType::Int32Bare),
            "int32-full" => Ok(ColumnType::Int32Full),
            "int64" | "bigint" => Ok(ColumnType::Int64),
            "float32-hex" => Ok(ColumnType::Float32Hex),
            "float64" | "float" | "double" | "real" => Ok(ColumnType::Float64),
            "float64-ext" => Ok(ColumnType::Float64Ext),
            "float64-hex" => Ok(ColumnType::Float64Hex),
            "string" | "str" | "text" => Ok(ColumnType::String),
            _ => Err(anyhow!(
                "Unknown column type '{value}'. Supported types: {}",
                ColumnType::variants().join(", ")
            )),
        }
    }
}

impl Serialize for ColumnType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for ColumnType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let token = String::deserialize(deserializer)?;
        ColumnType::from_str(&token).map_err(|err| de::Error::custom(err.to_string()))
    }
}
