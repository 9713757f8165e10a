//! The boundary between the engine and the storage that receives rows.
//!
//! [`OutputSink`] is the callback contract the reader drives; [`Frame`] is the
//! in-memory column store used by default and by the CLI.

use std::collections::BTreeMap;

use log::{debug, info};
use parking_lot::Mutex;

use crate::{
    schema::{ColumnSpec, OutputLayout},
    staging::ThreadContext,
    types::{
        ColumnType, NA_BOOL8, NA_INT32, NA_INT64, NA_STRING_LEN, is_na_float32, is_na_float64,
        na_float32, na_float64,
    },
    value::Value,
};

/// Receiver of a read. Methods taking `&self` run on worker threads, several
/// at a time; `&mut self` methods run on the driving thread between passes.
pub trait OutputSink: Sync {
    /// Called once after sampling. Columns may be dropped or widened, never
    /// narrowed. Returning `false` aborts the read.
    fn override_schema(&mut self, _columns: &mut [ColumnSpec]) -> bool {
        true
    }

    /// Prepares storage for a pass, discarding rows of any earlier pass.
    /// Returns the rows made available; zero for a non-zero request is a
    /// failure.
    fn allocate(&mut self, layout: &OutputLayout, nrows: usize) -> usize;

    fn prepare_thread_context(&self, _ctx: &mut ThreadContext<'_>) {}

    /// Runs after a chunk is scanned, before its output rows are known.
    fn postprocess_buffer(&self, _ctx: &mut ThreadContext<'_>) {}

    /// Runs inside the ordered section, once `row_start` is assigned.
    fn order_buffer(&self, _ctx: &ThreadContext<'_>) {}

    /// Copies a committed chunk into storage.
    fn push_buffer(&self, ctx: &ThreadContext<'_>);

    fn free_thread_context(&self, _ctx: &mut ThreadContext<'_>) {}

    fn set_final_row_count(&mut self, nrows: usize);

    /// Hands over the string bytes that `push_buffer` spans point into.
    fn adopt_strings(&mut self, column: usize, bytes: Vec<u8>);

    fn report_progress(&self, _percent: f64) {}
}

/// Location of a string within its column's heap. NA has `len == i32::MIN`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrSpan {
    pub offset: u64,
    pub len: i32,
}

impl StrSpan {
    pub const NA: StrSpan = StrSpan {
        offset: 0,
        len: NA_STRING_LEN,
    };

    pub fn is_na(&self) -> bool {
        self.len == NA_STRING_LEN
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StringColumn {
    pub heap: Vec<u8>,
    pub spans: Vec<StrSpan>,
}

impl StringColumn {
    pub fn get(&self, row: usize) -> Option<&[u8]> {
        let span = self.spans.get(row)?;
        if span.is_na() {
            return None;
        }
        let start = span.offset as usize;
        self.heap.get(start..start + span.len as usize)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Bool(Vec<i8>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
    Str(StringColumn),
}

impl ColumnData {
    /// NA-filled storage for `nrows` values of `ty`.
    pub fn for_type(ty: ColumnType, nrows: usize) -> Option<Self> {
        let data = match ty {
            ColumnType::Drop => return None,
            ColumnType::Bool8 => ColumnData::Bool(vec![NA_BOOL8; nrows]),
            ColumnType::Int32Bare | ColumnType::Int32Full => ColumnData::Int32(vec![NA_INT32; nrows]),
            ColumnType::Int64 => ColumnData::Int64(vec![NA_INT64; nrows]),
            ColumnType::Float32Hex => ColumnData::Float32(vec![na_float32(); nrows]),
            ColumnType::Float64 | ColumnType::Float64Ext | ColumnType::Float64Hex => {
                ColumnData::Float64(vec![na_float64(); nrows])
            }
            ColumnType::String => ColumnData::Str(StringColumn {
                heap: Vec::new(),
                spans: vec![StrSpan::NA; nrows],
            }),
        };
        Some(data)
    }

    pub fn len(&self) -> usize {
        match self {
            ColumnData::Bool(v) => v.len(),
            ColumnData::Int32(v) => v.len(),
            ColumnData::Int64(v) => v.len(),
            ColumnData::Float32(v) => v.len(),
            ColumnData::Float64(v) => v.len(),
            ColumnData::Str(s) => s.spans.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Grows with NA or truncates to exactly `nrows`.
    pub fn resize(&mut self, nrows: usize) {
        match self {
            ColumnData::Bool(v) => v.resize(nrows, NA_BOOL8),
            ColumnData::Int32(v) => v.resize(nrows, NA_INT32),
            ColumnData::Int64(v) => v.resize(nrows, NA_INT64),
            ColumnData::Float32(v) => v.resize(nrows, na_float32()),
            ColumnData::Float64(v) => v.resize(nrows, na_float64()),
            ColumnData::Str(s) => s.spans.resize(nrows, StrSpan::NA),
        }
    }

    pub fn value(&self, row: usize) -> Option<Value> {
        match self {
            ColumnData::Bool(v) => v.get(row).filter(|b| **b != NA_BOOL8).map(|b| Value::Bool(*b != 0)),
            ColumnData::Int32(v) => v.get(row).filter(|i| **i != NA_INT32).map(|i| Value::Int32(*i)),
            ColumnData::Int64(v) => v.get(row).filter(|i| **i != NA_INT64).map(|i| Value::Int64(*i)),
            ColumnData::Float32(v) => v
                .get(row)
                .filter(|f| !is_na_float32(**f))
                .map(|f| Value::Float32(*f)),
            ColumnData::Float64(v) => v
                .get(row)
                .filter(|f| !is_na_float64(**f))
                .map(|f| Value::Float64(*f)),
            ColumnData::Str(s) => s
                .get(row)
                .map(|bytes| Value::Str(String::from_utf8_lossy(bytes).into_owned())),
        }
    }

    fn write_bytes(&self, out: &mut Vec<u8>) {
        match self {
            ColumnData::Bool(v) => out.extend(v.iter().map(|b| *b as u8)),
            ColumnData::Int32(v) => v.iter().for_each(|i| out.extend_from_slice(&i.to_le_bytes())),
            ColumnData::Int64(v) => v.iter().for_each(|i| out.extend_from_slice(&i.to_le_bytes())),
            ColumnData::Float32(v) => v
                .iter()
                .for_each(|f| out.extend_from_slice(&f.to_bits().to_le_bytes())),
            ColumnData::Float64(v) => v
                .iter()
                .for_each(|f| out.extend_from_slice(&f.to_bits().to_le_bytes())),
            ColumnData::Str(s) => {
                for row in 0..s.spans.len() {
                    match s.get(row) {
                        Some(bytes) => {
                            out.extend_from_slice(&(bytes.len() as i32).to_le_bytes());
                            out.extend_from_slice(bytes);
                        }
                        None => out.extend_from_slice(&NA_STRING_LEN.to_le_bytes()),
                    }
                }
            }
        }
    }
}

#[derive(Debug)]
struct FrameColumn {
    spec: ColumnSpec,
    /// Index among all input columns.
    source: usize,
    /// Index among the pass's string columns.
    string_index: Option<usize>,
    data: Mutex<ColumnData>,
}

/// Column-major in-memory table. Dropped columns are not stored.
#[derive(Debug, Default)]
pub struct Frame {
    columns: Vec<FrameColumn>,
    nrows: usize,
    overrides: BTreeMap<String, ColumnType>,
    show_progress: bool,
}

impl Frame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests `ty` for the column named `name` once sampling is done.
    pub fn with_override(mut self, name: impl Into<String>, ty: ColumnType) -> Self {
        self.overrides.insert(name.into(), ty);
        self
    }

    pub fn with_overrides<I>(mut self, overrides: I) -> Self
    where
        I: IntoIterator<Item = (String, ColumnType)>,
    {
        self.overrides.extend(overrides);
        self
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncol(&self) -> usize {
        self.columns.len()
    }

    pub fn names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.spec.name.clone()).collect()
    }

    pub fn types(&self) -> Vec<ColumnType> {
        self.columns.iter().map(|c| c.spec.datatype).collect()
    }

    pub fn specs(&self) -> Vec<ColumnSpec> {
        self.columns.iter().map(|c| c.spec.clone()).collect()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.spec.name == name)
    }

    pub fn column(&self, index: usize) -> Option<ColumnData> {
        self.columns.get(index).map(|c| c.data.lock().clone())
    }

    pub fn value(&self, row: usize, column: usize) -> Option<Value> {
        self.columns.get(column)?.data.lock().value(row)
    }

    pub fn values(&self, column: usize) -> Vec<Option<Value>> {
        let Some(col) = self.columns.get(column) else {
            return Vec::new();
        };
        let data = col.data.lock();
        (0..self.nrows).map(|row| data.value(row)).collect()
    }

    /// Display strings for one row; NA becomes `na`.
    pub fn row_strings(&self, row: usize, na: &str) -> Vec<String> {
        self.columns
            .iter()
            .map(|c| {
                c.data
                    .lock()
                    .value(row)
                    .map_or_else(|| na.to_string(), |v| v.as_display())
            })
            .collect()
    }

    /// Every column's type and values, NA sentinels included bit for bit.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(self.nrows as u64).to_le_bytes());
        for column in &self.columns {
            out.push(column.spec.datatype.code());
            out.extend_from_slice(column.spec.name.as_bytes());
            out.push(0);
            column.data.lock().write_bytes(&mut out);
        }
        out
    }
}

impl OutputSink for Frame {
    fn override_schema(&mut self, columns: &mut [ColumnSpec]) -> bool {
        for column in columns.iter_mut() {
            if let Some(ty) = self.overrides.get(&column.name) {
                column.datatype = *ty;
            }
        }
        true
    }

    fn allocate(&mut self, layout: &OutputLayout, nrows: usize) -> usize {
        debug!("Allocating {nrows} row(s) with column widths {:?}", layout.sizes());
        self.columns = layout
            .columns
            .iter()
            .enumerate()
            .filter_map(|(source, spec)| {
                let data = ColumnData::for_type(spec.datatype, nrows)?;
                let string_index = layout.rows.strings.iter().position(|(c, _)| *c == source);
                Some(FrameColumn {
                    spec: spec.clone(),
                    source,
                    string_index,
                    data: Mutex::new(data),
                })
            })
            .collect();
        self.nrows = nrows;
        nrows.max(1)
    }

    fn push_buffer(&self, ctx: &ThreadContext<'_>) {
        let Some(start) = ctx.row_start else {
            return;
        };
        let n = ctx.nrows;
        for column in &self.columns {
            let slot = ctx.layout.slots[column.source].index;
            let mut data = column.data.lock();
            if data.len() < start + n {
                data.resize(start + n);
            }
            match &mut *data {
                ColumnData::Bool(v) => {
                    for row in 0..n {
                        v[start + row] = ctx.get1(row, slot) as i8;
                    }
                }
                ColumnData::Int32(v) => {
                    for row in 0..n {
                        v[start + row] = ctx.get4(row, slot) as i32;
                    }
                }
                ColumnData::Float32(v) => {
                    for row in 0..n {
                        v[start + row] = f32::from_bits(ctx.get4(row, slot));
                    }
                }
                ColumnData::Int64(v) => {
                    for row in 0..n {
                        v[start + row] = ctx.get8(row, slot) as i64;
                    }
                }
                ColumnData::Float64(v) => {
                    for row in 0..n {
                        v[start + row] = f64::from_bits(ctx.get8(row, slot));
                    }
                }
                ColumnData::Str(s) => {
                    let Some(string_index) = column.string_index else {
                        continue;
                    };
                    for row in 0..n {
                        s.spans[start + row] = ctx
                            .string_span(string_index, row)
                            .map_or(StrSpan::NA, |(offset, len)| StrSpan { offset, len });
                    }
                }
            }
        }
    }

    fn set_final_row_count(&mut self, nrows: usize) {
        for column in &self.columns {
            column.data.lock().resize(nrows);
        }
        self.nrows = nrows;
    }

    fn adopt_strings(&mut self, column: usize, bytes: Vec<u8>) {
        if let Some(target) = self.columns.iter_mut().find(|c| c.source == column)
            && let ColumnData::Str(s) = target.data.get_mut()
        {
            s.heap = bytes;
        }
    }

    fn report_progress(&self, percent: f64) {
        if self.show_progress {
            info!("Read {percent:.0}%");
        }
    }
}
