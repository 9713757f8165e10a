mod common;

use std::sync::atomic::{AtomicUsize, Ordering};

use csv_columnar::{
    ColumnData, ColumnSpec, ColumnType, Frame, HeaderMode, OutputSink, QuoteRule, ReadError,
    ReadWarning, Reader, RunConfig, Value, read_bytes,
    schema::OutputLayout,
    staging::ThreadContext,
    types::{NA_BOOL8, NA_FLOAT32_BITS, NA_FLOAT64_BITS, NA_INT32, NA_INT64, NA_STRING_LEN},
};
use parking_lot::Mutex;

use common::numbered_rows;

fn read(text: &str, config: RunConfig) -> (Frame, csv_columnar::ReadSummary) {
    read_bytes(text.as_bytes(), config).expect("read succeeds")
}

fn int(v: i32) -> Option<Value> {
    Some(Value::Int32(v))
}

fn text(v: &str) -> Option<Value> {
    Some(Value::Str(v.to_string()))
}

#[test]
fn small_file_with_header_reads_two_int_columns() {
    let (frame, summary) = read("a,b\n1,2\n3,4\n", RunConfig::default());
    assert_eq!(summary.dialect.sep, b',');
    assert!(summary.header);
    assert_eq!(frame.names(), vec!["a", "b"]);
    assert_eq!(frame.types(), vec![ColumnType::Int32Bare, ColumnType::Int32Bare]);
    assert_eq!(frame.values(0), vec![int(1), int(3)]);
    assert_eq!(frame.values(1), vec![int(2), int(4)]);
}

#[test]
fn mixed_column_becomes_string() {
    let (frame, _) = read("a,b\n1,2\n3,hello\n", RunConfig::default());
    assert_eq!(frame.types()[1], ColumnType::String);
    assert_eq!(frame.values(1), vec![text("2"), text("hello")]);
}

#[test]
fn na_strings_become_sentinels() {
    let (frame, _) = read("x\nNA\n5\n", RunConfig::default().with_na_strings(["NA"]));
    assert_eq!(frame.values(0), vec![None, int(5)]);
    match frame.column(0) {
        Some(ColumnData::Int32(values)) => assert_eq!(values, vec![NA_INT32, 5]),
        other => panic!("unexpected column {other:?}"),
    }
}

#[test]
fn na_strings_use_each_type_sentinel() {
    let (frame, _) = read(
        "flag,big,half,ratio,label\nTRUE,3000000000,0x1.8p+1,0.25,ann\nNA,NA,NA,NA,NA\n",
        RunConfig::default(),
    );
    assert_eq!(
        frame.types(),
        vec![
            ColumnType::Bool8,
            ColumnType::Int64,
            ColumnType::Float32Hex,
            ColumnType::Float64,
            ColumnType::String,
        ]
    );
    assert!((0..5).all(|column| frame.value(1, column).is_none()));
    match frame.column(0) {
        Some(ColumnData::Bool(values)) => assert_eq!(values, vec![1, NA_BOOL8]),
        other => panic!("unexpected column {other:?}"),
    }
    match frame.column(1) {
        Some(ColumnData::Int64(values)) => assert_eq!(values, vec![3_000_000_000, NA_INT64]),
        other => panic!("unexpected column {other:?}"),
    }
    match frame.column(2) {
        Some(ColumnData::Float32(values)) => {
            let bits: Vec<u32> = values.iter().map(|v| v.to_bits()).collect();
            assert_eq!(bits, vec![3.0f32.to_bits(), NA_FLOAT32_BITS]);
        }
        other => panic!("unexpected column {other:?}"),
    }
    match frame.column(3) {
        Some(ColumnData::Float64(values)) => {
            let bits: Vec<u64> = values.iter().map(|v| v.to_bits()).collect();
            assert_eq!(bits, vec![0.25f64.to_bits(), NA_FLOAT64_BITS]);
        }
        other => panic!("unexpected column {other:?}"),
    }
    match frame.column(4) {
        Some(ColumnData::Str(strings)) => {
            assert_eq!(strings.get(0), Some(&b"ann"[..]));
            assert_eq!(strings.spans[1].len, NA_STRING_LEN);
        }
        other => panic!("unexpected column {other:?}"),
    }
}

#[test]
fn hex_float_columns_are_exact() {
    let (frame, _) = read(
        "single,double\n0x1.8p+1,0x1.0000000001p+0\n-0x1p-2,0x1p+0\n",
        RunConfig::default(),
    );
    assert_eq!(frame.types(), vec![ColumnType::Float32Hex, ColumnType::Float64Hex]);
    assert_eq!(
        frame.values(0),
        vec![Some(Value::Float32(3.0)), Some(Value::Float32(-0.25))]
    );
    match frame.column(1) {
        Some(ColumnData::Float64(values)) => {
            assert_eq!(values, vec![1.0 + 2f64.powi(-40), 1.0]);
        }
        other => panic!("unexpected column {other:?}"),
    }
}

#[test]
fn na_survives_restart_to_string() {
    let input = numbered_rows("id,code", 20_000, |i| match i {
        7 => format!("{i},NA"),
        19_990 => format!("{i},late"),
        _ => format!("{i},{i}"),
    });
    let config = RunConfig::default().with_threads(4).with_chunk_bytes(4096);
    let (frame, summary) = read(&input, config);
    assert_eq!(summary.passes, 2);
    assert_eq!(frame.types()[1], ColumnType::String);
    assert_eq!(frame.value(7, 1), None);
    assert_eq!(frame.value(8, 1), text("8"));
    match frame.column(1) {
        Some(ColumnData::Str(strings)) => {
            assert_eq!(strings.spans[7].len, NA_STRING_LEN);
            assert_eq!(strings.get(19_990), Some(&b"late"[..]));
        }
        other => panic!("unexpected column {other:?}"),
    }
}

#[test]
fn values_past_row_limit_keep_narrow_types() {
    let (frame, summary) = read("x\n1\n2\nhello\n", RunConfig::default().with_nrow_limit(2));
    assert_eq!(summary.passes, 1);
    assert_eq!(frame.types(), vec![ColumnType::Int32Bare]);
    assert_eq!(frame.values(0), vec![int(1), int(2)]);
}

#[test]
fn all_text_file_keeps_its_first_row() {
    let (frame, summary) = read("ann,oslo\nbob,rome\n", RunConfig::default());
    assert!(!summary.header);
    assert_eq!(frame.names(), vec!["V1", "V2"]);
    assert_eq!(frame.values(0), vec![text("ann"), text("bob")]);
}

#[test]
fn quoted_separator_stays_in_field() {
    let config = RunConfig::default()
        .with_sep(b',')
        .with_quote(Some(b'"'))
        .with_header(HeaderMode::No);
    let (frame, _) = read("\"a,b\"", config);
    assert_eq!(frame.ncol(), 1);
    assert_eq!(frame.values(0), vec![text("a,b")]);
}

#[test]
fn fill_pads_short_rows() {
    let (frame, _) = read("a,b,c\n1,2\n3,4,5\n", RunConfig::default().with_fill(true));
    assert_eq!(frame.row_strings(0, "NA"), vec!["1", "2", "NA"]);
    assert_eq!(frame.row_strings(1, "NA"), vec!["3", "4", "5"]);
}

#[test]
fn late_string_restarts_and_keeps_every_row() {
    let input = numbered_rows("id,code,score", 20_000, |i| {
        if i == 19_990 {
            format!("{i},code-{i},{}.5", i % 100)
        } else {
            format!("{i},{i},{}.5", i % 100)
        }
    });
    let config = RunConfig::default().with_threads(4).with_chunk_bytes(4096);
    let (frame, summary) = read(&input, config);

    assert_eq!(summary.passes, 2);
    assert_eq!(summary.type_history[0][1], ColumnType::Int32Bare);
    assert_eq!(frame.types()[1], ColumnType::String);
    assert_eq!(frame.nrows(), 20_000);
    for row in [0, 1, 4095, 12_345, 19_989, 19_999] {
        assert_eq!(frame.value(row, 0), int(row as i32), "row {row}");
        assert_eq!(frame.value(row, 1), text(&row.to_string()), "row {row}");
    }
    assert_eq!(frame.value(19_990, 1), text("code-19990"));
}

#[test]
fn types_never_narrow_across_passes() {
    let input = numbered_rows("a,b", 5_000, |i| match i {
        4_000 => format!("{i},3000000000"),
        4_500 => format!("{i},2.5"),
        _ => format!("{i},{}", i % 7),
    });
    let (frame, summary) = read(&input, RunConfig::default().with_threads(3).with_chunk_bytes(1024));
    for pair in summary.type_history.windows(2) {
        for (before, after) in pair[0].iter().zip(&pair[1]) {
            assert!(before <= after);
        }
    }
    assert_eq!(frame.types()[1], ColumnType::Float64);
    assert_eq!(frame.value(4_000, 1), Some(Value::Float64(3_000_000_000.0)));
    assert_eq!(frame.value(4_500, 1), Some(Value::Float64(2.5)));
}

#[test]
fn booleans_and_wide_integers_are_typed() {
    let (frame, _) = read(
        "flag,big,ratio\nTRUE,3000000000,0.25\nfalse,-12,1e3\n",
        RunConfig::default(),
    );
    assert_eq!(
        frame.types(),
        vec![ColumnType::Bool8, ColumnType::Int64, ColumnType::Float64]
    );
    assert_eq!(frame.value(1, 0), Some(Value::Bool(false)));
    assert_eq!(frame.value(0, 1), Some(Value::Int64(3_000_000_000)));
    assert_eq!(frame.value(1, 2), Some(Value::Float64(1000.0)));
}

#[test]
fn semicolon_files_detect_comma_decimal() {
    let (frame, summary) = read("a;b\n1,5;2\n3,25;4\n", RunConfig::default());
    assert_eq!(summary.dialect.sep, b';');
    assert_eq!(summary.dialect.dec, b',');
    assert_eq!(frame.values(0), vec![Some(Value::Float64(1.5)), Some(Value::Float64(3.25))]);
}

#[test]
fn doubled_quotes_are_unescaped() {
    let (frame, summary) = read("id,quote\n1,\"say \"\"hi\"\"\"\n2,plain\n", RunConfig::default());
    assert_eq!(summary.dialect.quote_rule, QuoteRule::Doubled);
    assert_eq!(frame.values(1), vec![text("say \"hi\""), text("plain")]);
}

#[test]
fn backslash_escaped_quotes_are_detected() {
    let (frame, summary) = read("1,\"a\\\"b\"\n2,\"c\"\n", RunConfig::default());
    assert_eq!(summary.dialect.quote_rule, QuoteRule::Escaped);
    assert_eq!(frame.values(1), vec![text("a\"b"), text("c")]);
}

#[test]
fn skip_rows_and_skip_to_find_the_table() {
    let input = "exported by tool\n\na,b\n1,2\n";
    let (by_count, _) = read(input, RunConfig::default().with_skip_rows(2));
    let (by_marker, _) = read(input, RunConfig::default().with_skip_to("a,b"));
    for frame in [by_count, by_marker] {
        assert_eq!(frame.names(), vec!["a", "b"]);
        assert_eq!(frame.values(1), vec![int(2)]);
    }
}

#[test]
fn missing_skip_marker_is_a_config_error() {
    let err = read_bytes(b"a,b\n1,2\n", RunConfig::default().with_skip_to("nowhere")).unwrap_err();
    assert!(matches!(err, ReadError::InvalidConfig(_)), "{err}");
}

#[test]
fn row_limit_stops_across_chunks() {
    let input = numbered_rows("n,s", 10_000, |i| format!("{i},s{i}"));
    let config = RunConfig::default()
        .with_nrow_limit(2_500)
        .with_threads(4)
        .with_chunk_bytes(512);
    let (frame, summary) = read(&input, config);
    assert_eq!(summary.rows, 2_500);
    assert_eq!(frame.nrows(), 2_500);
    assert_eq!(frame.value(2_499, 1), text("s2499"));
}

#[test]
fn ragged_row_stops_early_with_warning() {
    let (frame, summary) = read("a,b\n1,2\n3,4\n5\n6,7\n", RunConfig::default());
    assert_eq!(frame.nrows(), 2);
    assert_eq!(
        summary.warnings,
        vec![ReadWarning::StoppedEarly {
            row: 3,
            offset: 12,
            expected: 2,
            found: 1,
        }]
    );
}

#[test]
fn strict_mode_turns_warnings_into_errors() {
    let err = read_bytes(
        b"a,b\n1,2\n3,4\n5\n6,7\n",
        RunConfig::default().with_warnings_are_errors(true),
    )
    .unwrap_err();
    assert!(matches!(err, ReadError::Warning(ReadWarning::StoppedEarly { .. })), "{err}");
}

#[test]
fn blank_lines_are_na_rows_unless_skipped() {
    let input = "a,b\n1,2\n\n3,4\n";
    let (kept, _) = read(input, RunConfig::default());
    assert_eq!(kept.values(0), vec![int(1), None, int(3)]);
    let (skipped, _) = read(input, RunConfig::default().with_skip_empty_lines(true));
    assert_eq!(skipped.values(0), vec![int(1), int(3)]);
}

#[test]
fn empty_input_reads_zero_rows() {
    let (frame, summary) = read("", RunConfig::default());
    assert_eq!(summary.rows, 0);
    assert_eq!(frame.ncol(), 0);
}

#[test]
fn overrides_widen_and_drop_columns() {
    let mut frame = Frame::new()
        .with_override("a", ColumnType::String)
        .with_override("c", ColumnType::Drop);
    let summary = Reader::new(b"a,b,c\n1,2,3\n", RunConfig::default())
        .expect("valid config")
        .read_into(&mut frame)
        .expect("read succeeds");
    assert_eq!(summary.columns[2].datatype, ColumnType::Drop);
    assert_eq!(frame.names(), vec!["a", "b"]);
    assert_eq!(frame.values(0), vec![text("1")]);
}

#[test]
fn narrowing_override_is_rejected() {
    let mut frame = Frame::new().with_override("b", ColumnType::Int32Bare);
    let err = Reader::new(b"a,b\n1,x\n", RunConfig::default())
        .expect("valid config")
        .read_into(&mut frame)
        .unwrap_err();
    match err {
        ReadError::InvalidOverride {
            column,
            inferred,
            requested,
        } => {
            assert_eq!(column, "b");
            assert_eq!(inferred, ColumnType::String);
            assert_eq!(requested, ColumnType::Int32Bare);
        }
        other => panic!("unexpected error {other}"),
    }
}

/// Records every committed chunk instead of storing values.
#[derive(Default)]
struct RecordingSink {
    abort: bool,
    pushed: Mutex<Vec<(usize, usize)>>,
    contexts: AtomicUsize,
    final_rows: usize,
}

impl OutputSink for RecordingSink {
    fn override_schema(&mut self, _columns: &mut [ColumnSpec]) -> bool {
        !self.abort
    }

    fn allocate(&mut self, _layout: &OutputLayout, nrows: usize) -> usize {
        self.pushed.lock().clear();
        nrows.max(1)
    }

    fn prepare_thread_context(&self, _ctx: &mut ThreadContext<'_>) {
        self.contexts.fetch_add(1, Ordering::SeqCst);
    }

    fn push_buffer(&self, ctx: &ThreadContext<'_>) {
        let start = ctx.row_start.expect("row start assigned before push");
        self.pushed.lock().push((start, ctx.nrows));
    }

    fn free_thread_context(&self, _ctx: &mut ThreadContext<'_>) {
        self.contexts.fetch_sub(1, Ordering::SeqCst);
    }

    fn set_final_row_count(&mut self, nrows: usize) {
        self.final_rows = nrows;
    }

    fn adopt_strings(&mut self, _column: usize, _bytes: Vec<u8>) {}
}

#[test]
fn committed_chunks_tile_the_output_rows() {
    let input = numbered_rows("a,b", 8_000, |i| format!("{i},{}", i * 2));
    let mut sink = RecordingSink::default();
    let summary = Reader::new(
        input.as_bytes(),
        RunConfig::default().with_threads(4).with_chunk_bytes(700),
    )
    .expect("valid config")
    .read_into(&mut sink)
    .expect("read succeeds");

    assert!(summary.chunks > 1);
    assert_eq!(sink.final_rows, 8_000);
    assert_eq!(sink.contexts.load(Ordering::SeqCst), 0);
    let mut pushed = sink.pushed.into_inner();
    pushed.sort_unstable();
    let mut next = 0;
    for (start, rows) in pushed {
        assert_eq!(start, next);
        next += rows;
    }
    assert_eq!(next, 8_000);
}

#[test]
fn sink_can_abort_before_allocation() {
    let mut sink = RecordingSink {
        abort: true,
        ..RecordingSink::default()
    };
    let err = Reader::new(b"a\n1\n", RunConfig::default())
        .expect("valid config")
        .read_into(&mut sink)
        .unwrap_err();
    assert!(matches!(err, ReadError::Aborted));
}
