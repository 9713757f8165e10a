//! Per-invocation read settings.
//!
//! A [`RunConfig`] is built once (usually through the chained `with_*`
//! setters or from CLI arguments), validated, and then only read.

use serde::{Deserialize, Serialize};

use crate::error::{ReadError, ReadResult};

pub const DEFAULT_QUOTE: u8 = b'"';
pub const DEFAULT_SAMPLE_LINES: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeaderMode {
    No,
    Yes,
    #[default]
    Auto,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Maximum number of data rows to keep; `None` reads everything.
    pub nrow_limit: Option<usize>,
    /// Lines to skip before sampling starts.
    pub skip_rows: usize,
    /// Start at the first line containing this text.
    pub skip_to: Option<String>,
    pub na_strings: Vec<String>,
    /// 0 uses every core, a negative value leaves that many cores idle.
    pub threads: i32,
    pub sep: Option<u8>,
    pub dec: Option<u8>,
    /// `None` disables quoting altogether.
    pub quote: Option<u8>,
    pub header: HeaderMode,
    pub strip_white: bool,
    pub skip_empty_lines: bool,
    pub fill: bool,
    pub show_progress: bool,
    pub verbose: bool,
    pub warnings_are_errors: bool,
    /// Records read per sample point during detection.
    pub sample_lines: usize,
    /// Target chunk size in bytes for the parallel scan.
    pub chunk_bytes: Option<usize>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            nrow_limit: None,
            skip_rows: 0,
            skip_to: None,
            na_strings: vec!["NA".to_string()],
            threads: 0,
            sep: None,
            dec: None,
            quote: Some(DEFAULT_QUOTE),
            header: HeaderMode::Auto,
            strip_white: true,
            skip_empty_lines: false,
            fill: false,
            show_progress: false,
            verbose: false,
            warnings_are_errors: false,
            sample_lines: DEFAULT_SAMPLE_LINES,
            chunk_bytes: None,
        }
    }
}

impl RunConfig {
    pub fn with_sep(mut self, sep: u8) -> Self {
        self.sep = Some(sep);
        self
    }

    pub fn with_dec(mut self, dec: u8) -> Self {
        self.dec = Some(dec);
        self
    }

    pub fn with_quote(mut self, quote: Option<u8>) -> Self {
        self.quote = quote;
        self
    }

    pub fn with_header(mut self, header: HeaderMode) -> Self {
        self.header = header;
        self
    }

    pub fn with_na_strings<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.na_strings = values.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_threads(mut self, threads: i32) -> Self {
        self.threads = threads;
        self
    }

    pub fn with_nrow_limit(mut self, limit: usize) -> Self {
        self.nrow_limit = Some(limit);
        self
    }

    pub fn with_skip_rows(mut self, rows: usize) -> Self {
        self.skip_rows = rows;
        self
    }

    pub fn with_skip_to(mut self, marker: impl Into<String>) -> Self {
        self.skip_to = Some(marker.into());
        self
    }

    pub fn with_fill(mut self, fill: bool) -> Self {
        self.fill = fill;
        self
    }

    pub fn with_strip_white(mut self, strip: bool) -> Self {
        self.strip_white = strip;
        self
    }

    pub fn with_skip_empty_lines(mut self, skip: bool) -> Self {
        self.skip_empty_lines = skip;
        self
    }

    pub fn with_warnings_are_errors(mut self, strict: bool) -> Self {
        self.warnings_are_errors = strict;
        self
    }

    pub fn with_chunk_bytes(mut self, bytes: usize) -> Self {
        self.chunk_bytes = Some(bytes);
        self
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn validate(&self) -> ReadResult<()> {
        let invalid = |msg: String| Err(ReadError::InvalidConfig(msg));
        for (label, value) in [("sep", self.sep), ("dec", self.dec), ("quote", self.quote)] {
            if let Some(ch) = value {
                if !ch.is_ascii() {
                    return invalid(format!("{label} must be an ASCII character"));
                }
                if ch == b'\n' || ch == b'\r' {
                    return invalid(format!("{label} cannot be a line terminator"));
                }
            }
        }
        if let Some(quote) = self.quote {
            if self.sep == Some(quote) {
                return invalid("sep and quote cannot be the same character".to_string());
            }
            if self.dec == Some(quote) {
                return invalid("dec and quote cannot be the same character".to_string());
            }
        }
        if self.skip_rows > 0 && self.skip_to.is_some() {
            return invalid("skip_rows and skip_to cannot be used together".to_string());
        }
        if matches!(self.skip_to.as_deref(), Some("")) {
            return invalid("skip_to cannot be empty".to_string());
        }
        if self.sample_lines == 0 {
            return invalid("sample_lines must be positive".to_string());
        }
        if self.chunk_bytes == Some(0) {
            return invalid("chunk_bytes must be positive".to_string());
        }
        Ok(())
    }

    /// Number of worker threads after applying the 0/negative conventions.
    pub fn resolved_threads(&self) -> usize {
        let available = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        match self.threads {
            0 => available,
            n if n < 0 => available.saturating_sub(n.unsigned_abs() as usize).max(1),
            n => n as usize,
        }
    }

    /// Level for per-pass engine detail; `verbose` lifts it to info.
    pub fn detail_level(&self) -> log::Level {
        if self.verbose {
            log::Level::Info
        } else {
            log::Level::Debug
        }
    }

    pub fn is_na(&self, field: &[u8]) -> bool {
        self.na_strings.iter().any(|na| na.as_bytes() == field)
    }
}
