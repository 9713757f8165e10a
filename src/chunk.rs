//! Prelude skipping and the split of the body into line-aligned chunks.

use memchr::memmem;

use crate::{
    config::RunConfig,
    error::{ReadError, ReadResult},
    field::{Dialect, QuoteRule, RawField, eol_len, is_blank_record, next_line_start, read_record},
};

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];
/// Records that must tokenize cleanly after a guessed chunk boundary.
const BOUNDARY_CHECK_RECORDS: usize = 5;
const MIN_CHUNK_BYTES: usize = 1 << 20;
const LINES_PER_CHUNK: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub index: usize,
    pub start: usize,
    pub end: usize,
}

/// Byte range left once the BOM, skipped lines and blank leading lines are
/// removed and trailing line terminators trimmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Prelude {
    pub start: usize,
    pub end: usize,
    pub has_bom: bool,
}

pub fn skip_prelude(input: &[u8], config: &RunConfig) -> ReadResult<Prelude> {
    let has_bom = input.starts_with(UTF8_BOM);
    let mut pos = if has_bom { UTF8_BOM.len() } else { 0 };

    if let Some(marker) = config.skip_to.as_deref() {
        let found = memmem::find(&input[pos..], marker.as_bytes()).ok_or_else(|| {
            ReadError::InvalidConfig(format!("skip_to marker '{marker}' not found in input"))
        })?;
        let at = pos + found;
        pos = input[pos..at]
            .iter()
            .rposition(|&b| b == b'\n' || b == b'\r')
            .map_or(pos, |line_end| pos + line_end + 1);
    } else {
        for _ in 0..config.skip_rows {
            match next_line_start(input, pos) {
                Some(next) => pos = next,
                None => {
                    pos = input.len();
                    break;
                }
            }
        }
    }

    loop {
        let mut ahead = pos;
        while ahead < input.len() && matches!(input[ahead], b' ' | b'\t') {
            ahead += 1;
        }
        match eol_len(input, ahead) {
            Some(len) => pos = ahead + len,
            None => break,
        }
    }

    let mut end = input.len();
    while end > pos && matches!(input[end - 1], b'\n' | b'\r') {
        end -= 1;
    }
    Ok(Prelude {
        start: pos,
        end: end.max(pos),
        has_bom,
    })
}

fn is_line_start(input: &[u8], pos: usize) -> bool {
    pos == 0
        || input[pos - 1] == b'\n'
        || (input[pos - 1] == b'\r' && input.get(pos) != Some(&b'\n'))
}

fn records_look_valid(
    input: &[u8],
    start: usize,
    dialect: &Dialect,
    ncol: usize,
    fill: bool,
    fields: &mut Vec<RawField>,
) -> bool {
    let mut pos = start;
    for _ in 0..BOUNDARY_CHECK_RECORDS {
        if pos >= input.len() {
            break;
        }
        let Ok(next) = read_record(input, pos, dialect, fields) else {
            return false;
        };
        let count = fields.len();
        if count != ncol && !(fill && count < ncol) && !is_blank_record(fields) {
            return false;
        }
        pos = next;
    }
    true
}

/// First line start at or after `guess` from which the next few records
/// tokenize to a legal field count. `input` must end at the body end.
pub fn next_record_start(
    input: &[u8],
    guess: usize,
    dialect: &Dialect,
    ncol: usize,
    fill: bool,
) -> Option<usize> {
    let mut candidate = if is_line_start(input, guess) {
        guess
    } else {
        next_line_start(input, guess)?
    };
    let mut fields = Vec::with_capacity(ncol);
    while candidate < input.len() {
        if dialect.quote_rule == QuoteRule::None
            || records_look_valid(input, candidate, dialect, ncol, fill, &mut fields)
        {
            return Some(candidate);
        }
        candidate = next_line_start(input, candidate)?;
    }
    None
}

/// Bytes each chunk should cover.
pub fn target_chunk_bytes(config: &RunConfig, mean_line_len: f64) -> usize {
    config.chunk_bytes.unwrap_or_else(|| {
        let by_lines = (mean_line_len.max(1.0) * LINES_PER_CHUNK as f64) as usize;
        by_lines.max(MIN_CHUNK_BYTES)
    })
}

/// Splits `[start, input.len())` into chunks whose interior boundaries fall on
/// record starts. `input` must end at the body end.
pub fn plan_chunks(
    input: &[u8],
    start: usize,
    threads: usize,
    target_bytes: usize,
    dialect: &Dialect,
    ncol: usize,
    fill: bool,
) -> Vec<Chunk> {
    let end = input.len();
    let bytes = end.saturating_sub(start);
    let threads = threads.max(1);
    let mut count = bytes.div_ceil(target_bytes.max(1)).max(1);
    if count > 1 {
        count = count.div_ceil(threads) * threads;
    }
    count = count.min(bytes.max(1));
    let step = bytes / count;

    let mut bounds = vec![start];
    for i in 1..count {
        let guess = start + i * step;
        let Some(boundary) = next_record_start(input, guess, dialect, ncol, fill) else {
            break;
        };
        let last = *bounds.last().unwrap_or(&start);
        if boundary > last && boundary < end {
            bounds.push(boundary);
        }
    }
    bounds.push(end);

    bounds
        .windows(2)
        .enumerate()
        .map(|(index, pair)| Chunk {
            index,
            start: pair[0],
            end: pair[1],
        })
        .collect()
}
