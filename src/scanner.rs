//! Parses one chunk of records into a worker's [`ThreadContext`].

use crate::{
    config::RunConfig,
    field::{
        Dialect, FieldError, FieldErrorKind, FieldParse, FieldView, Parsed, RawField,
        is_blank_record, parse_field, read_record,
    },
    schema::{ColumnSlot, RowLayout},
    staging::{LenOff, MAX_STAGED_OFFSET, ThreadContext},
    types::{
        ColumnType, NA_BOOL8, NA_FLOAT32_BITS, NA_FLOAT64_BITS, NA_INT32, NA_INT64, SlotClass,
        promote,
    },
};

/// A column whose values need a later type than the pass was scanning with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeBump {
    pub column: usize,
    pub required: ColumnType,
    /// Row within the chunk where the column first failed.
    pub row: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowStopKind {
    TooFewFields { found: usize },
    TooManyFields { found: usize },
    UnterminatedQuote,
    TextAfterQuote,
    FieldTooLarge,
}

impl RowStopKind {
    /// Field-count stops may end a read early instead of failing it.
    pub fn is_ragged(&self) -> bool {
        matches!(
            self,
            RowStopKind::TooFewFields { .. } | RowStopKind::TooManyFields { .. }
        )
    }

    pub fn found(&self) -> Option<usize> {
        match self {
            RowStopKind::TooFewFields { found } | RowStopKind::TooManyFields { found } => {
                Some(*found)
            }
            _ => None,
        }
    }

    pub fn describe(&self, expected: usize) -> String {
        match self {
            RowStopKind::TooFewFields { found } => {
                format!("expected {expected} field(s) but found {found}")
            }
            RowStopKind::TooManyFields { found } => {
                format!("expected {expected} field(s) but found {found}")
            }
            RowStopKind::UnterminatedQuote => "quoted field is never closed".to_string(),
            RowStopKind::TextAfterQuote => "unexpected text after closing quote".to_string(),
            RowStopKind::FieldTooLarge => "field exceeds the maximum field size".to_string(),
        }
    }
}

impl From<FieldError> for RowStopKind {
    fn from(err: FieldError) -> Self {
        match err.kind {
            FieldErrorKind::UnterminatedQuote => RowStopKind::UnterminatedQuote,
            FieldErrorKind::TextAfterQuote => RowStopKind::TextAfterQuote,
        }
    }
}

/// A record the scanner could not accept. Rows before it are staged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowStop {
    pub row: usize,
    pub offset: usize,
    pub kind: RowStopKind,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkScan {
    /// Position just past the last record read.
    pub end: usize,
    pub bumps: Vec<TypeBump>,
    pub stop: Option<RowStop>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    Abandoned,
    Finished(ChunkScan),
}

/// Read-only inputs shared by every chunk of a pass.
pub struct ScanParams<'a> {
    /// Input truncated at the body end.
    pub input: &'a [u8],
    pub dialect: &'a Dialect,
    pub config: &'a RunConfig,
    pub layout: &'a RowLayout,
}

impl ScanParams<'_> {
    fn is_na(&self, field: &RawField) -> bool {
        !field.quoted && self.config.is_na(field.content(self.input))
    }
}

/// Scans the records starting in `[start, end)`. Values are staged until the
/// first field that needs a wider type; from there the rest of the chunk is
/// only checked, so that every bump the chunk needs is reported at once.
pub fn scan_chunk(
    ctx: &mut ThreadContext<'_>,
    params: &ScanParams<'_>,
    chunk_index: usize,
    start: usize,
    end: usize,
) -> ScanOutcome {
    ctx.reset(chunk_index, start);
    let ncol = params.layout.ncol();
    let mut fields: Vec<RawField> = Vec::with_capacity(ncol);
    let mut bumps: Vec<TypeBump> = Vec::new();
    let mut checked_types: Option<Vec<ColumnType>> = None;
    let mut pos = start;
    let mut row = 0usize;
    let mut stop = None;

    while pos < end {
        if ctx.cancel.is_cancelled() {
            return ScanOutcome::Abandoned;
        }
        // Rows past the limit can never be kept, whatever precedes the chunk.
        if params.config.nrow_limit.is_some_and(|limit| row >= limit) {
            break;
        }
        let record_start = pos;
        let next = match read_record(params.input, pos, params.dialect, &mut fields) {
            Ok(next) => next,
            Err(err) => {
                stop = Some(RowStop {
                    row,
                    offset: record_start,
                    kind: err.into(),
                });
                break;
            }
        };

        if is_blank_record(&fields) && ncol > 0 {
            if !params.config.skip_empty_lines {
                if checked_types.is_none() {
                    stage_na_row(ctx);
                }
                row += 1;
            }
            pos = next;
            continue;
        }

        let found = fields.len();
        if found > ncol {
            stop = Some(RowStop {
                row,
                offset: record_start,
                kind: RowStopKind::TooManyFields { found },
            });
            break;
        }
        if found < ncol && !params.config.fill {
            stop = Some(RowStop {
                row,
                offset: record_start,
                kind: RowStopKind::TooFewFields { found },
            });
            break;
        }
        if fields
            .iter()
            .any(|f| f.len() > i32::MAX as usize || f.end - start > MAX_STAGED_OFFSET)
        {
            stop = Some(RowStop {
                row,
                offset: record_start,
                kind: RowStopKind::FieldTooLarge,
            });
            break;
        }

        match checked_types.as_mut() {
            Some(types) => check_row(params, &fields, types, &mut bumps, row),
            None => {
                if let Err(bump) = stage_row(ctx, params, &fields, start) {
                    bumps.push(TypeBump { row, ..bump });
                    let mut types = params.layout.types.clone();
                    types[bump.column] = promote(types[bump.column], bump.required);
                    check_row(params, &fields, &mut types, &mut bumps, row);
                    checked_types = Some(types);
                }
            }
        }
        row += 1;
        pos = next;
    }

    ScanOutcome::Finished(ChunkScan {
        end: pos,
        bumps,
        stop,
    })
}

fn stage_na_row(ctx: &mut ThreadContext<'_>) {
    let row = ctx.begin_row();
    let layout = ctx.layout;
    for (col, ty) in layout.types.iter().enumerate() {
        write_na(ctx, row, layout.slots[col], *ty);
    }
}

/// Stages one record. On the first value that does not fit its column the
/// partly written row is discarded and the bump returned.
fn stage_row(
    ctx: &mut ThreadContext<'_>,
    params: &ScanParams<'_>,
    fields: &[RawField],
    anchor: usize,
) -> Result<(), TypeBump> {
    let row = ctx.begin_row();
    let layout = params.layout;
    for (col, &ty) in layout.types.iter().enumerate() {
        let slot = layout.slots[col];
        let Some(field) = fields.get(col) else {
            write_na(ctx, row, slot, ty);
            continue;
        };
        if ty.is_dropped() {
            continue;
        }
        let parsed = match parse_field(
            ty,
            field.view(params.input),
            params.dialect.dec,
            params.is_na(field),
        ) {
            FieldParse::Accepted(parsed) => parsed,
            FieldParse::Mismatch { required } => {
                ctx.truncate(row);
                return Err(TypeBump {
                    column: col,
                    required,
                    row: 0,
                });
            }
        };
        match parsed {
            Parsed::Na => write_na(ctx, row, slot, ty),
            Parsed::Bool(value) => ctx.put1(row, slot.index, value as u8),
            Parsed::Int32(value) => ctx.put4(row, slot.index, value as u32),
            Parsed::Float32(value) => ctx.put4(row, slot.index, value.to_bits()),
            Parsed::Int64(value) => ctx.put8(row, slot.index, value as u64),
            Parsed::Float64(value) => ctx.put8(row, slot.index, value.to_bits()),
            Parsed::Text => {
                let span = LenOff {
                    len: field.len() as i32,
                    off: (field.start - anchor) as u32,
                    escaped: field.escaped,
                };
                ctx.put8(row, slot.index, span.pack());
            }
        }
    }
    Ok(())
}

/// Checks a record against `types`, widening them and recording a bump for
/// every column that needs it.
fn check_row(
    params: &ScanParams<'_>,
    fields: &[RawField],
    types: &mut [ColumnType],
    bumps: &mut Vec<TypeBump>,
    row: usize,
) {
    for (col, field) in fields.iter().enumerate() {
        let ty = types[col];
        if ty.is_dropped() || ty.is_string() {
            continue;
        }
        let view: FieldView<'_> = field.view(params.input);
        if let FieldParse::Mismatch { required } =
            parse_field(ty, view, params.dialect.dec, params.is_na(field))
        {
            types[col] = promote(ty, required);
            match bumps.iter_mut().find(|bump| bump.column == col) {
                Some(bump) => bump.required = bump.required.max(required),
                None => bumps.push(TypeBump {
                    column: col,
                    required,
                    row,
                }),
            }
        }
    }
}

fn write_na(ctx: &mut ThreadContext<'_>, row: usize, slot: ColumnSlot, ty: ColumnType) {
    match slot.class {
        SlotClass::Skip => {}
        SlotClass::Byte => ctx.put1(row, slot.index, NA_BOOL8 as u8),
        SlotClass::Narrow => {
            let bits = if ty == ColumnType::Float32Hex {
                NA_FLOAT32_BITS
            } else {
                NA_INT32 as u32
            };
            ctx.put4(row, slot.index, bits);
        }
        SlotClass::Wide => {
            let bits = match ty {
                ColumnType::Int64 => NA_INT64 as u64,
                ColumnType::String => LenOff::NA.pack(),
                _ => NA_FLOAT64_BITS,
            };
            ctx.put8(row, slot.index, bits);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{field::QuoteRule, staging::CancelToken};

    fn dialect() -> Dialect {
        Dialect {
            sep: b',',
            quote: b'"',
            quote_rule: QuoteRule::Doubled,
            dec: b'.',
            strip_white: true,
        }
    }

    fn run_scan(input: &[u8], types: &[ColumnType], config: &RunConfig) -> (ChunkScan, usize) {
        let layout = RowLayout::new(types);
        let cancel = CancelToken::new();
        let dialect = dialect();
        let params = ScanParams {
            input,
            dialect: &dialect,
            config,
            layout: &layout,
        };
        let mut ctx = ThreadContext::new(0, &layout, &cancel, b'"', QuoteRule::Doubled);
        match scan_chunk(&mut ctx, &params, 0, 0, input.len()) {
            ScanOutcome::Finished(scan) => (scan, ctx.nrows),
            ScanOutcome::Abandoned => panic!("not cancelled"),
        }
    }

    #[test]
    fn stages_typed_values() {
        let input = b"1,2.5,x\n-3,NA,\"y\"";
        let layout = RowLayout::new(&[ColumnType::Int32Bare, ColumnType::Float64, ColumnType::String]);
        let cancel = CancelToken::new();
        let config = RunConfig::default();
        let dialect = dialect();
        let params = ScanParams {
            input,
            dialect: &dialect,
            config: &config,
            layout: &layout,
        };
        let mut ctx = ThreadContext::new(0, &layout, &cancel, b'"', QuoteRule::Doubled);
        let ScanOutcome::Finished(scan) = scan_chunk(&mut ctx, &params, 0, 0, input.len()) else {
            panic!("abandoned");
        };
        assert!(scan.bumps.is_empty());
        assert_eq!(scan.end, input.len());
        assert_eq!(ctx.nrows, 2);
        assert_eq!(ctx.get4(1, 0) as i32, -3);
        assert_eq!(ctx.get8(0, 0), 2.5f64.to_bits());
        assert_eq!(ctx.get8(1, 0), NA_FLOAT64_BITS);
        let span = LenOff::unpack(ctx.get8(1, 1));
        assert_eq!((span.off, span.len), (15, 1));
    }

    #[test]
    fn first_mismatch_switches_to_probing() {
        let input = b"1,2\n3,x\n4.5,6\n7,8";
        let (scan, staged) = run_scan(
            input,
            &[ColumnType::Int32Bare, ColumnType::Int32Bare],
            &RunConfig::default(),
        );
        assert_eq!(staged, 1);
        assert_eq!(
            scan.bumps,
            vec![
                TypeBump { column: 1, required: ColumnType::String, row: 1 },
                TypeBump { column: 0, required: ColumnType::Float64, row: 2 },
            ]
        );
        assert_eq!(scan.end, input.len());
    }

    #[test]
    fn ragged_rows_stop_or_fill() {
        let input = b"1,2,3\n4,5\n6,7,8";
        let types = [ColumnType::Int32Bare; 3];
        let (scan, staged) = run_scan(input, &types, &RunConfig::default());
        assert_eq!(staged, 1);
        let stop = scan.stop.unwrap();
        assert_eq!(stop.kind, RowStopKind::TooFewFields { found: 2 });
        assert_eq!((stop.row, stop.offset), (1, 6));
        assert_eq!(scan.end, 6);

        let (scan, staged) = run_scan(input, &types, &RunConfig::default().with_fill(true));
        assert!(scan.stop.is_none());
        assert_eq!(staged, 3);

        let (scan, _) = run_scan(b"1,2,3,4", &types, &RunConfig::default().with_fill(true));
        assert_eq!(scan.stop.unwrap().kind, RowStopKind::TooManyFields { found: 4 });
    }

    #[test]
    fn blank_lines_are_na_rows_unless_skipped() {
        let input = b"1,2\n\n3,4";
        let types = [ColumnType::Int32Bare; 2];
        let (_, staged) = run_scan(input, &types, &RunConfig::default());
        assert_eq!(staged, 3);
        let (_, staged) = run_scan(input, &types, &RunConfig::default().with_skip_empty_lines(true));
        assert_eq!(staged, 2);
    }

    #[test]
    fn tokenizer_failure_is_a_stop() {
        let (scan, staged) = run_scan(
            b"1,\"ok\"\n2,\"open",
            &[ColumnType::Int32Bare, ColumnType::String],
            &RunConfig::default(),
        );
        assert_eq!(staged, 1);
        assert_eq!(scan.stop.unwrap().kind, RowStopKind::UnterminatedQuote);
    }

    #[test]
    fn cancelled_scan_is_abandoned() {
        let layout = RowLayout::new(&[ColumnType::Int32Bare]);
        let cancel = CancelToken::new();
        cancel.cancel();
        let config = RunConfig::default();
        let dialect = dialect();
        let params = ScanParams {
            input: b"1\n2",
            dialect: &dialect,
            config: &config,
            layout: &layout,
        };
        let mut ctx = ThreadContext::new(0, &layout, &cancel, b'"', QuoteRule::Doubled);
        assert_eq!(scan_chunk(&mut ctx, &params, 0, 0, 3), ScanOutcome::Abandoned);
    }
}
