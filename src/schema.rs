use std::{
    fs::File,
    io::{BufReader, BufWriter},
    path::Path,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    error::{ReadError, ReadResult},
    types::{ColumnType, SlotClass, promote},
};

pub const CURRENT_SCHEMA_VERSION: &str = "1.0";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub datatype: ColumnType,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, datatype: ColumnType) -> Self {
        Self {
            name: name.into(),
            datatype,
        }
    }

    pub fn width(&self) -> usize {
        self.datatype.size()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Schema {
    pub columns: Vec<ColumnSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<String>,
    #[serde(default = "Schema::default_has_headers")]
    pub has_headers: bool,
}

impl Schema {
    pub fn new(columns: Vec<ColumnSpec>, has_headers: bool) -> Self {
        Schema {
            columns,
            schema_version: None,
            has_headers,
        }
    }

    pub const fn default_has_headers() -> bool {
        true
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn types(&self) -> Vec<ColumnType> {
        self.columns.iter().map(|c| c.datatype).collect()
    }

    /// Raises column `index` to at least `observed`. Returns whether the type
    /// changed.
    pub fn promote(&mut self, index: usize, observed: ColumnType) -> bool {
        let column = &mut self.columns[index];
        let promoted = promote(column.datatype, observed);
        let changed = promoted != column.datatype;
        column.datatype = promoted;
        changed
    }

    pub fn layout(&self) -> OutputLayout {
        OutputLayout {
            columns: self.columns.clone(),
            rows: RowLayout::new(&self.types()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path).with_context(|| format!("Creating schema file {path:?}"))?;
        serde_yaml::to_writer(BufWriter::new(file), &self.versioned())
            .context("Writing schema YAML")
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        serde_yaml::to_string(&self.versioned()).context("Serializing schema to YAML string")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening schema file {path:?}"))?;
        let schema: Schema =
            serde_yaml::from_reader(BufReader::new(file)).context("Parsing schema YAML")?;
        Ok(schema)
    }

    fn versioned(&self) -> Schema {
        let mut schema = self.clone();
        if schema.schema_version.is_none() {
            schema.schema_version = Some(CURRENT_SCHEMA_VERSION.to_string());
        }
        schema
    }
}

/// Rejects any column an override moved to an earlier type, other than a drop.
pub fn check_override(inferred: &[ColumnSpec], requested: &[ColumnSpec]) -> ReadResult<()> {
    if inferred.len() != requested.len() {
        return Err(ReadError::Internal(format!(
            "schema override changed the column count from {} to {}",
            inferred.len(),
            requested.len()
        )));
    }
    for (before, after) in inferred.iter().zip(requested) {
        if after.datatype.is_dropped() || after.datatype >= before.datatype {
            continue;
        }
        return Err(ReadError::InvalidOverride {
            column: after.name.clone(),
            inferred: before.datatype,
            requested: after.datatype,
        });
    }
    Ok(())
}

pub fn generate_field_names(count: usize) -> Vec<String> {
    (1..=count).map(|idx| format!("V{idx}")).collect()
}

/// Pads or fills blank names so every one of `count` columns has one.
pub fn complete_names(mut names: Vec<String>, count: usize) -> Vec<String> {
    names.truncate(count);
    for (idx, name) in names.iter_mut().enumerate() {
        if name.trim().is_empty() {
            *name = format!("V{}", idx + 1);
        }
    }
    for idx in names.len()..count {
        names.push(format!("V{}", idx + 1));
    }
    names
}

/// Where one column's value sits within a staged row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnSlot {
    pub class: SlotClass,
    pub index: usize,
}

/// Row-major staging geometry derived from a set of column types: each
/// non-dropped column gets a slot in the buffer matching its width.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowLayout {
    pub types: Vec<ColumnType>,
    pub slots: Vec<ColumnSlot>,
    pub stride8: usize,
    pub stride4: usize,
    pub stride1: usize,
    /// `(column, slot)` for each string column, in column order.
    pub strings: Vec<(usize, usize)>,
}

impl RowLayout {
    pub fn new(types: &[ColumnType]) -> Self {
        let mut slots = Vec::with_capacity(types.len());
        let (mut stride8, mut stride4, mut stride1) = (0, 0, 0);
        let mut strings = Vec::new();
        for (col, ty) in types.iter().enumerate() {
            let class = ty.slot_class();
            let counter = match class {
                SlotClass::Skip => {
                    slots.push(ColumnSlot { class, index: 0 });
                    continue;
                }
                SlotClass::Wide => &mut stride8,
                SlotClass::Narrow => &mut stride4,
                SlotClass::Byte => &mut stride1,
            };
            slots.push(ColumnSlot {
                class,
                index: *counter,
            });
            if ty.is_string() {
                strings.push((col, *counter));
            }
            *counter += 1;
        }
        RowLayout {
            types: types.to_vec(),
            slots,
            stride8,
            stride4,
            stride1,
            strings,
        }
    }

    pub fn ncol(&self) -> usize {
        self.types.len()
    }

    pub fn ndrop(&self) -> usize {
        self.types.iter().filter(|ty| ty.is_dropped()).count()
    }
}

/// What the output sink is asked to allocate for a pass.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    pub columns: Vec<ColumnSpec>,
    pub rows: RowLayout,
}

impl OutputLayout {
    pub fn ncol(&self) -> usize {
        self.columns.len()
    }

    pub fn ndrop(&self) -> usize {
        self.rows.ndrop()
    }

    pub fn sizes(&self) -> Vec<usize> {
        self.columns.iter().map(ColumnSpec::width).collect()
    }
}
