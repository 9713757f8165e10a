pub mod chunk;
pub mod cli;
pub mod config;
pub mod error;
pub mod field;
pub mod io_utils;
pub mod output;
pub mod reader;
pub mod sampler;
pub mod scanner;
pub mod schema;
pub mod sequencer;
pub mod staging;
pub mod table;
pub mod types;
pub mod value;

use std::{env, sync::OnceLock};

use anyhow::{Context, Result};
use clap::Parser;
use log::{LevelFilter, debug, info};

use crate::cli::{Cli, Commands};

pub use crate::{
    config::{HeaderMode, RunConfig},
    error::{ReadError, ReadResult, ReadWarning},
    field::{Dialect, QuoteRule},
    output::{ColumnData, Frame, OutputSink},
    reader::{ReadSummary, Reader, read_bytes},
    sampler::Detected,
    schema::{ColumnSpec, Schema},
    types::ColumnType,
    value::Value,
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("csv_columnar", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Probe(args) => handle_probe(&args),
        Commands::Read(args) => handle_read(&args),
    }
}

fn handle_probe(args: &cli::ProbeArgs) -> Result<()> {
    info!("Probing '{}'", args.input.display());
    let encoding = io_utils::resolve_encoding(args.options.input_encoding.as_deref())?;
    let input = io_utils::load_input(&args.input, encoding)?;
    let reader = Reader::new(&input, args.options.to_config())?;
    let detected = reader
        .detect()
        .with_context(|| format!("Detecting layout of {:?}", args.input))?;

    if args.json {
        let json = serde_json::to_string_pretty(&detected).context("Serializing probe result")?;
        println!("{json}");
    } else {
        println!(
            "sep='{}' quote={:?} dec='{}' header={} rows~{}{}",
            printable_delimiter(detected.dialect.sep),
            detected.dialect.quote_rule,
            detected.dialect.dec as char,
            detected.header,
            detected.estimated_rows,
            if detected.exact_rows { " (exact)" } else { "" }
        );
        let headers = vec!["#".to_string(), "name".to_string(), "type".to_string()];
        let rows = detected
            .names
            .iter()
            .zip(&detected.types)
            .enumerate()
            .map(|(idx, (name, ty))| vec![(idx + 1).to_string(), name.clone(), ty.to_string()])
            .collect::<Vec<_>>();
        table::print_table(&headers, &rows);
    }

    if let Some(path) = &args.schema {
        let columns = detected
            .names
            .iter()
            .zip(&detected.types)
            .map(|(name, ty)| ColumnSpec::new(name.clone(), *ty))
            .collect();
        let schema = Schema::new(columns, detected.header);
        schema
            .save(path)
            .with_context(|| format!("Writing schema to {path:?}"))?;
        info!(
            "Schema for {} column(s) written to {:?}",
            schema.columns.len(),
            path
        );
    }
    Ok(())
}

fn handle_read(args: &cli::ReadArgs) -> Result<()> {
    let encoding = io_utils::resolve_encoding(args.options.input_encoding.as_deref())?;
    let input = io_utils::load_input(&args.input, encoding)?;
    let config = args.options.to_config();

    let mut frame = Frame::new().with_progress(config.show_progress);
    if let Some(path) = &args.schema {
        let schema =
            Schema::load(path).with_context(|| format!("Loading schema from {path:?}"))?;
        frame = frame.with_overrides(
            schema
                .columns
                .into_iter()
                .map(|column| (column.name, column.datatype)),
        );
    }
    frame = frame.with_overrides(args.col_types.iter().cloned());
    debug!("Column overrides: {:?}", args.col_types);

    let summary = Reader::new(&input, config)?
        .read_into(&mut frame)
        .with_context(|| format!("Reading {:?}", args.input))?;

    if let Some(path) = &args.summary {
        let json = serde_json::to_string_pretty(&summary).context("Serializing read summary")?;
        std::fs::write(path, json).with_context(|| format!("Writing summary to {path:?}"))?;
    }

    if let Some(count) = args.preview {
        print!("{}", table::render_frame(&frame, count));
        info!(
            "Displayed {} of {} row(s)",
            frame.nrows().min(count),
            frame.nrows()
        );
        return Ok(());
    }

    let delimiter = args.output_delimiter.unwrap_or(summary.dialect.sep);
    let output_encoding = io_utils::resolve_encoding(args.output_encoding.as_deref())?;
    let mut writer = io_utils::open_csv_writer(args.output.as_deref(), delimiter, output_encoding)?;
    let written = io_utils::write_frame(&frame, &mut writer, &args.na_output)?;
    info!(
        "Wrote {written} row(s) x {} column(s) after {} pass(es)",
        frame.ncol(),
        summary.passes
    );
    Ok(())
}

pub(crate) fn printable_delimiter(delimiter: u8) -> String {
    match delimiter {
        b',' => ",".to_string(),
        b'\t' => "\\t".to_string(),
        b'\n' => "\\n".to_string(),
        b' ' => "space".to_string(),
        other => (other as char).to_string(),
    }
}
