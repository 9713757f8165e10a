//! Dialect, header and column type detection from a bounded sample.
//!
//! The sampler reads the head of the body under every candidate dialect,
//! keeps the candidate whose records agree best on a field count, then
//! derives the decimal mark, the header flag, the column names and an
//! initial type per column. Types come from the head sample plus up to nine
//! samples taken at evenly spaced record boundaries through the body.

use std::cmp::Ordering;

use itertools::Itertools;
use log::{debug, log};
use serde::Serialize;

use crate::{
    chunk::{Prelude, next_record_start, skip_prelude},
    config::{DEFAULT_QUOTE, HeaderMode, RunConfig},
    error::{ReadError, ReadResult, ReadWarning},
    field::{
        Dialect, FieldError, FieldView, QuoteRule, RawField, is_blank_record, parse_float64,
        parse_value, read_record, required_type, unescape_into,
    },
    schema::{complete_names, generate_field_names},
    types::ColumnType,
};

pub const SEP_CANDIDATES: [u8; 6] = [b',', b'\t', b'|', b';', b' ', b':'];
const JUMP_SAMPLES: usize = 9;
const ESTIMATE_MARGIN: f64 = 1.1;

/// Everything the engine needs to know about an input before scanning it.
#[derive(Debug, Clone, Serialize)]
pub struct Detected {
    pub dialect: Dialect,
    pub header: bool,
    pub names: Vec<String>,
    pub types: Vec<ColumnType>,
    /// First byte of the first data record.
    pub body_start: usize,
    /// End of the last record, trailing line terminators excluded.
    pub body_end: usize,
    pub estimated_rows: usize,
    /// The head sample reached the end of the body, so the estimate is exact.
    pub exact_rows: bool,
    pub sampled_rows: usize,
    pub mean_line_len: f64,
    pub warnings: Vec<ReadWarning>,
}

impl Detected {
    pub fn ncol(&self) -> usize {
        self.types.len()
    }
}

/// Records read from one position, plus where reading stopped.
struct Sample {
    rows: Vec<Vec<RawField>>,
    /// Byte length of each record, terminator included.
    lengths: Vec<usize>,
    end: usize,
    error: Option<FieldError>,
}

impl Sample {
    fn read(input: &[u8], start: usize, dialect: &Dialect, max_records: usize) -> Sample {
        let mut rows = Vec::new();
        let mut lengths = Vec::new();
        let mut pos = start;
        let mut fields = Vec::new();
        let mut error = None;
        while pos < input.len() && rows.len() < max_records {
            match read_record(input, pos, dialect, &mut fields) {
                Ok(next) => {
                    rows.push(fields.clone());
                    lengths.push(next - pos);
                    pos = next;
                }
                Err(err) => {
                    error = Some(err);
                    break;
                }
            }
        }
        Sample {
            rows,
            lengths,
            end: pos,
            error,
        }
    }

    fn data_rows(&self) -> impl Iterator<Item = &Vec<RawField>> {
        self.rows.iter().filter(|row| !is_blank_record(row))
    }
}

/// Candidate ranking, compared lexicographically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Score {
    plausible_multi: bool,
    agree: usize,
    ncol: usize,
    typed: usize,
}

fn modal_field_count(sample: &Sample) -> (usize, usize) {
    sample
        .data_rows()
        .map(Vec::len)
        .counts()
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)))
        .unwrap_or((0, 0))
}

fn score(input: &[u8], sample: &Sample, dialect: &Dialect, config: &RunConfig) -> Score {
    let (ncol, agree) = modal_field_count(sample);
    let rows = sample.data_rows().count();
    let mut types = vec![ColumnType::FIRST_SCANNED; ncol];
    for row in sample.data_rows().skip(1).filter(|row| row.len() == ncol) {
        bump_types(input, row, &mut types, dialect, config);
    }
    Score {
        plausible_multi: ncol > 1 && 2 * agree > rows,
        agree,
        ncol,
        typed: types.iter().filter(|ty| **ty < ColumnType::String).count(),
    }
}

fn field_is_na(input: &[u8], field: &RawField, config: &RunConfig) -> bool {
    !field.quoted && config.is_na(field.content(input))
}

fn bump_types(
    input: &[u8],
    row: &[RawField],
    types: &mut [ColumnType],
    dialect: &Dialect,
    config: &RunConfig,
) {
    for (ty, field) in types.iter_mut().zip(row) {
        if ty.is_dropped() || ty.is_string() || field_is_na(input, field, config) {
            continue;
        }
        let view = field.view(input);
        if parse_value(*ty, view, dialect.dec).is_none() {
            *ty = required_type(*ty, view, dialect.dec);
        }
    }
}

fn choose_dialect(
    input: &[u8],
    start: usize,
    config: &RunConfig,
) -> ReadResult<(Dialect, Sample)> {
    let seps: Vec<u8> = match config.sep {
        Some(sep) => vec![sep],
        None => SEP_CANDIDATES.to_vec(),
    };
    let rules: &[QuoteRule] = match config.quote {
        Some(_) => &QuoteRule::TRIAL_ORDER,
        None => &[QuoteRule::None],
    };
    let dec = config.dec.unwrap_or(b'.');

    let mut best: Option<(Score, Dialect, Sample)> = None;
    for &sep in &seps {
        if config.dec == Some(sep) {
            continue;
        }
        for &quote_rule in rules {
            let dialect = Dialect {
                sep,
                quote: config.quote.unwrap_or(DEFAULT_QUOTE),
                quote_rule,
                dec,
                strip_white: config.strip_white,
            };
            let sample = Sample::read(input, start, &dialect, config.sample_lines);
            if sample.error.is_some() || sample.data_rows().next().is_none() {
                continue;
            }
            let score = score(input, &sample, &dialect, config);
            debug!(
                "Dialect sep='{}' quote={:?}: {:?}",
                crate::printable_delimiter(sep),
                quote_rule,
                score
            );
            let better = match &best {
                Some((current, _, _)) => score.cmp(current) == Ordering::Greater,
                None => true,
            };
            if better {
                best = Some((score, dialect, sample));
            }
        }
    }
    best.map(|(_, dialect, sample)| (dialect, sample))
        .ok_or(ReadError::DialectUndetectable)
}

/// `,` when more sampled fields read as numbers only with a comma mark than
/// only with a dot.
fn detect_decimal(input: &[u8], sample: &Sample, sep: u8) -> u8 {
    if sep == b',' {
        return b'.';
    }
    let (mut comma_only, mut dot_only) = (0usize, 0usize);
    for field in sample.data_rows().flatten() {
        let body = field.content(input).trim_ascii();
        match (
            parse_float64(body, b',').is_some(),
            parse_float64(body, b'.').is_some(),
        ) {
            (true, false) => comma_only += 1,
            (false, true) => dot_only += 1,
            _ => {}
        }
    }
    if comma_only > dot_only { b',' } else { b'.' }
}

fn value_type(
    input: &[u8],
    field: &RawField,
    dialect: &Dialect,
    config: &RunConfig,
) -> Option<ColumnType> {
    if field.is_empty() || field_is_na(input, field, config) {
        return None;
    }
    let view: FieldView<'_> = field.view(input);
    Some(required_type(ColumnType::Drop, view, dialect.dec))
}

/// The first record is a header when all its values are text and some later
/// record holds a non-text value under one of those names. A lone record of
/// text is taken as a header too.
fn looks_like_header(
    input: &[u8],
    rows: &[Vec<RawField>],
    dialect: &Dialect,
    config: &RunConfig,
) -> bool {
    let Some((first, rest)) = rows.split_first() else {
        return false;
    };
    let mut named = Vec::with_capacity(first.len());
    for field in first {
        match value_type(input, field, dialect, config) {
            None => named.push(false),
            Some(ColumnType::String) => named.push(true),
            Some(_) => return false,
        }
    }
    if !named.contains(&true) {
        return false;
    }
    let mut later = rest.iter().filter(|row| !is_blank_record(row)).peekable();
    if later.peek().is_none() {
        return true;
    }
    later.any(|row| {
        row.iter().zip(&named).any(|(field, &is_named)| {
            is_named
                && value_type(input, field, dialect, config)
                    .is_some_and(|ty| ty < ColumnType::String)
        })
    })
}

fn header_names(input: &[u8], row: &[RawField], dialect: &Dialect) -> Vec<String> {
    row.iter()
        .map(|field| {
            let content = field.content(input);
            let mut bytes = Vec::with_capacity(content.len());
            if field.escaped {
                unescape_into(content, dialect.quote, dialect.quote_rule, &mut bytes);
            } else {
                bytes.extend_from_slice(content);
            }
            String::from_utf8_lossy(&bytes).trim().to_string()
        })
        .collect()
}

fn row_fits(row: &[RawField], ncol: usize, fill: bool) -> bool {
    row.len() == ncol || (fill && row.len() < ncol)
}

pub fn detect(input: &[u8], config: &RunConfig) -> ReadResult<Detected> {
    config.validate()?;
    let prelude = skip_prelude(input, config)?;
    let body = &input[..prelude.end];
    if prelude.start >= prelude.end {
        return Ok(empty_input(prelude, config));
    }

    let (mut dialect, head) = choose_dialect(body, prelude.start, config)?;
    if config.dec.is_none() {
        dialect.dec = detect_decimal(body, &head, dialect.sep);
    }
    let (modal, _) = modal_field_count(&head);
    let ncol = if config.fill {
        head.data_rows().map(Vec::len).max().unwrap_or(modal)
    } else {
        modal
    };

    let first = head.rows.first().map(Vec::as_slice).unwrap_or(&[]);
    let header = match config.header {
        HeaderMode::Yes => true,
        HeaderMode::No => false,
        HeaderMode::Auto => looks_like_header(body, &head.rows, &dialect, config),
    };
    let mut warnings = Vec::new();
    let names = if header {
        let raw = header_names(body, first, &dialect);
        if raw.len() > ncol {
            warnings.push(ReadWarning::ExtraHeaderNames {
                names: raw.len(),
                columns: ncol,
            });
        }
        complete_names(raw, ncol)
    } else {
        generate_field_names(ncol)
    };
    let body_start = match (header, head.lengths.first()) {
        (true, Some(len)) => prelude.start + len,
        _ => prelude.start,
    };
    let data_offset = usize::from(header);

    // Only rows that can survive the row limit take part in typing.
    let typed_rows = config.nrow_limit.unwrap_or(usize::MAX);
    let mut types = vec![ColumnType::FIRST_SCANNED; ncol];
    let mut lengths: Vec<usize> = head.lengths.iter().skip(data_offset).copied().collect();
    let mut sampled_rows = 0usize;
    for row in head.rows.iter().skip(data_offset) {
        if is_blank_record(row) {
            if !config.skip_empty_lines {
                sampled_rows += 1;
            }
            continue;
        }
        sampled_rows += 1;
        if sampled_rows <= typed_rows && row_fits(row, ncol, config.fill) {
            bump_types(body, row, &mut types, &dialect, config);
        }
    }

    let exact_rows = head.end >= prelude.end && head.error.is_none();
    if !exact_rows {
        let span = prelude.end - body_start;
        let mut resume = head.end;
        for jump in 1..=JUMP_SAMPLES {
            let guess = body_start + span * jump / (JUMP_SAMPLES + 1);
            if guess < resume {
                continue;
            }
            let Some(at) = next_record_start(body, guess, &dialect, ncol, config.fill) else {
                break;
            };
            let sample = Sample::read(body, at, &dialect, config.sample_lines);
            if config.nrow_limit.is_none() {
                for row in sample.rows.iter().filter(|row| row_fits(row, ncol, config.fill)) {
                    bump_types(body, row, &mut types, &dialect, config);
                }
            }
            lengths.extend_from_slice(&sample.lengths);
            sampled_rows += sample.rows.len();
            resume = sample.end;
        }
    }

    let mean_line_len = mean(&lengths).unwrap_or((prelude.end - body_start).max(1) as f64);
    let estimated_rows = if exact_rows {
        sampled_rows
    } else {
        estimate_rows(&lengths, prelude.end - body_start).max(sampled_rows)
    };

    log!(
        config.detail_level(),
        "Detected sep='{}' quote={:?} dec='{}' header={} columns={} rows~{}{}",
        crate::printable_delimiter(dialect.sep),
        dialect.quote_rule,
        dialect.dec as char,
        header,
        ncol,
        estimated_rows,
        if exact_rows { " (exact)" } else { "" }
    );
    debug!(
        "Initial types: {}",
        names
            .iter()
            .zip(&types)
            .map(|(name, ty)| format!("{name}:{ty}"))
            .join(", ")
    );

    Ok(Detected {
        dialect,
        header,
        names,
        types,
        body_start,
        body_end: prelude.end,
        estimated_rows,
        exact_rows,
        sampled_rows,
        mean_line_len,
        warnings,
    })
}

fn empty_input(prelude: Prelude, config: &RunConfig) -> Detected {
    Detected {
        dialect: Dialect {
            sep: config.sep.unwrap_or(b','),
            quote: config.quote.unwrap_or(DEFAULT_QUOTE),
            quote_rule: if config.quote.is_some() {
                QuoteRule::Doubled
            } else {
                QuoteRule::None
            },
            dec: config.dec.unwrap_or(b'.'),
            strip_white: config.strip_white,
        },
        header: false,
        names: Vec::new(),
        types: Vec::new(),
        body_start: prelude.start,
        body_end: prelude.start,
        estimated_rows: 0,
        exact_rows: true,
        sampled_rows: 0,
        mean_line_len: 1.0,
        warnings: Vec::new(),
    }
}

fn mean(values: &[usize]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<usize>() as f64 / values.len() as f64)
}

/// Upper-biased row count for `bytes` of body, from sampled record lengths.
fn estimate_rows(lengths: &[usize], bytes: usize) -> usize {
    let Some(mean) = mean(lengths) else {
        return 0;
    };
    let variance = lengths
        .iter()
        .map(|&len| (len as f64 - mean).powi(2))
        .sum::<f64>()
        / lengths.len() as f64;
    let min_len = lengths.iter().copied().min().unwrap_or(1).max(1) as f64;
    let per_row = (mean - 2.0 * variance.sqrt()).max(min_len);
    (bytes as f64 / per_row * ESTIMATE_MARGIN).ceil() as usize
}
