use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::{
    config::{HeaderMode, RunConfig},
    types::ColumnType,
};

#[derive(Debug, Parser)]
#[command(author, version, about = "Read delimited text files in parallel into typed columns", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Detect the dialect, header and column types of a file
    Probe(ProbeArgs),
    /// Parse a file into typed columns and write it back out as CSV
    Read(ReadArgs),
}

#[derive(Debug, Args)]
pub struct ProbeArgs {
    /// Input file to inspect (`-` reads stdin)
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Save the detected columns as a YAML schema
    #[arg(short = 'o', long = "schema")]
    pub schema: Option<PathBuf>,
    /// Print the detection result as JSON instead of a table
    #[arg(long)]
    pub json: bool,
    #[command(flatten)]
    pub options: ReadOptions,
}

#[derive(Debug, Args)]
pub struct ReadArgs {
    /// Input file to read (`-` reads stdin)
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Output CSV file (stdout if omitted)
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
    /// Render the first N rows as a table instead of writing CSV
    #[arg(long)]
    pub preview: Option<usize>,
    /// YAML schema whose column types override the detected ones
    #[arg(long = "schema")]
    pub schema: Option<PathBuf>,
    /// Override one column's type, as `name:type`
    #[arg(long = "col-type", value_parser = parse_column_override, action = clap::ArgAction::Append)]
    pub col_types: Vec<(String, ColumnType)>,
    /// Write the read summary as JSON to this path
    #[arg(long = "summary")]
    pub summary: Option<PathBuf>,
    /// Delimiter for output (defaults to the detected separator)
    #[arg(long = "output-delimiter", value_parser = parse_delimiter)]
    pub output_delimiter: Option<u8>,
    /// Character encoding for the output file/stdout (defaults to utf-8)
    #[arg(long = "output-encoding")]
    pub output_encoding: Option<String>,
    /// Text written for missing values
    #[arg(long = "na-output", default_value = "")]
    pub na_output: String,
    #[command(flatten)]
    pub options: ReadOptions,
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
#[value(rename_all = "kebab-case")]
pub enum HeaderArg {
    Auto,
    Yes,
    No,
}

impl From<HeaderArg> for HeaderMode {
    fn from(value: HeaderArg) -> Self {
        match value {
            HeaderArg::Auto => HeaderMode::Auto,
            HeaderArg::Yes => HeaderMode::Yes,
            HeaderArg::No => HeaderMode::No,
        }
    }
}

/// Parsing options shared by `probe` and `read`.
#[derive(Debug, Args)]
pub struct ReadOptions {
    /// Field separator (detected when omitted; supports 'tab', 'comma', 'pipe', ...)
    #[arg(long, value_parser = parse_delimiter)]
    pub sep: Option<u8>,
    /// Quote character
    #[arg(long, value_parser = parse_delimiter, conflicts_with = "no_quote")]
    pub quote: Option<u8>,
    /// Treat quote characters as ordinary text
    #[arg(long = "no-quote")]
    pub no_quote: bool,
    /// Decimal mark (detected when omitted)
    #[arg(long, value_parser = parse_delimiter)]
    pub dec: Option<u8>,
    /// Whether the first record holds column names
    #[arg(long, value_enum, default_value = "auto")]
    pub header: HeaderArg,
    /// Field text read as missing (repeatable; defaults to NA)
    #[arg(long = "na", action = clap::ArgAction::Append)]
    pub na: Vec<String>,
    /// Skip this many lines before sampling
    #[arg(long = "skip", default_value_t = 0, conflicts_with = "skip_to")]
    pub skip: usize,
    /// Start at the first line containing this text
    #[arg(long = "skip-to")]
    pub skip_to: Option<String>,
    /// Maximum number of rows to read
    #[arg(long)]
    pub limit: Option<usize>,
    /// Worker threads (0 = all cores, negative = all cores but N)
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    pub threads: i32,
    /// Pad short rows with missing values instead of stopping
    #[arg(long)]
    pub fill: bool,
    /// Keep spaces around unquoted fields
    #[arg(long = "keep-white")]
    pub keep_white: bool,
    /// Skip blank lines instead of reading them as missing rows
    #[arg(long = "skip-empty-lines")]
    pub skip_empty_lines: bool,
    /// Fail on anything that would otherwise be a warning
    #[arg(long)]
    pub strict: bool,
    /// Lines read per sample point during detection
    #[arg(long = "sample-lines")]
    pub sample_lines: Option<usize>,
    /// Target chunk size in bytes (derived from line length when omitted)
    #[arg(long = "chunk-bytes")]
    pub chunk_bytes: Option<usize>,
    /// Character encoding of the input file (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
    /// Log read progress
    #[arg(long)]
    pub progress: bool,
    /// Log per-pass detail at info level
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

impl ReadOptions {
    pub fn to_config(&self) -> RunConfig {
        let mut config = RunConfig::default()
            .with_header(self.header.into())
            .with_threads(self.threads)
            .with_skip_rows(self.skip)
            .with_fill(self.fill)
            .with_strip_white(!self.keep_white)
            .with_skip_empty_lines(self.skip_empty_lines)
            .with_warnings_are_errors(self.strict)
            .with_progress(self.progress)
            .with_verbose(self.verbose);
        if let Some(sep) = self.sep {
            config = config.with_sep(sep);
        }
        if self.no_quote {
            config = config.with_quote(None);
        } else if let Some(quote) = self.quote {
            config = config.with_quote(Some(quote));
        }
        if let Some(dec) = self.dec {
            config = config.with_dec(dec);
        }
        if !self.na.is_empty() {
            config = config.with_na_strings(self.na.iter().cloned());
        }
        if let Some(marker) = &self.skip_to {
            config = config.with_skip_to(marker.clone());
        }
        if let Some(limit) = self.limit {
            config = config.with_nrow_limit(limit);
        }
        if let Some(bytes) = self.chunk_bytes {
            config = config.with_chunk_bytes(bytes);
        }
        if let Some(lines) = self.sample_lines {
            config.sample_lines = lines;
        }
        config
    }
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" | "\\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        "space" | " " => Ok(b' '),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}

pub fn parse_column_override(value: &str) -> Result<(String, ColumnType), String> {
    let (name, ty) = value
        .rsplit_once(':')
        .ok_or_else(|| format!("Expected name:type but got '{value}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err("Column name cannot be empty".to_string());
    }
    let ty = ty.parse::<ColumnType>().map_err(|err| err.to_string())?;
    Ok((name.to_string(), ty))
}
