//! File I/O around the engine: loading input bytes and writing frames back
//! out.
//!
//! - **Input**: files are memory-mapped with `memmap2`; stdin (`-`) and empty
//!   files are read into memory. Non-UTF-8 input is transcoded to UTF-8 with
//!   `encoding_rs` before parsing.
//! - **Output**: frames are written through the `csv` crate, optionally
//!   transcoded on the way out.

use std::{
    fs::File,
    io::{self, BufWriter, Read, Write},
    ops::Deref,
    path::Path,
};

use anyhow::{Context, Result, anyhow};
use csv::QuoteStyle;
use encoding_rs::{Encoding, UTF_8};
use log::debug;
use memmap2::Mmap;

use crate::output::Frame;

pub fn is_dash(path: &Path) -> bool {
    path == Path::new("-")
}

pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding> {
    if let Some(value) = label {
        Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| anyhow!("Unknown encoding '{value}'"))
    } else {
        Ok(UTF_8)
    }
}

/// Bytes handed to the reader.
pub enum InputBytes {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl Deref for InputBytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            InputBytes::Mapped(map) => map,
            InputBytes::Owned(bytes) => bytes,
        }
    }
}

pub fn load_input(path: &Path, encoding: &'static Encoding) -> Result<InputBytes> {
    let raw = if is_dash(path) {
        let mut bytes = Vec::new();
        io::stdin()
            .lock()
            .read_to_end(&mut bytes)
            .context("Reading stdin")?;
        InputBytes::Owned(bytes)
    } else {
        let file = File::open(path).with_context(|| format!("Opening input file {path:?}"))?;
        let len = file
            .metadata()
            .with_context(|| format!("Reading metadata of {path:?}"))?
            .len();
        if len == 0 {
            InputBytes::Owned(Vec::new())
        } else {
            // SAFETY: the map is read-only; the file must not be truncated
            // while it is mapped.
            let map = unsafe { Mmap::map(&file) }
                .with_context(|| format!("Memory-mapping input file {path:?}"))?;
            debug!("Mapped {len} byte(s) from {path:?}");
            InputBytes::Mapped(map)
        }
    };
    if encoding == UTF_8 {
        return Ok(raw);
    }
    Ok(InputBytes::Owned(
        decode_bytes(&raw, encoding)?.into_bytes(),
    ))
}

pub fn decode_bytes(bytes: &[u8], encoding: &'static Encoding) -> Result<String> {
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        Err(anyhow!(
            "Failed to decode text with encoding {}",
            encoding.name()
        ))
    } else {
        Ok(text.into_owned())
    }
}

pub fn open_csv_writer(
    path: Option<&Path>,
    delimiter: u8,
    encoding: &'static Encoding,
) -> Result<csv::Writer<Box<dyn Write>>> {
    let base: Box<dyn Write> = match path {
        Some(p) if !is_dash(p) => Box::new(BufWriter::new(
            File::create(p).with_context(|| format!("Creating output file {p:?}"))?,
        )),
        _ => Box::new(io::stdout()),
    };

    let writer: Box<dyn Write> = if encoding == UTF_8 {
        base
    } else {
        Box::new(TranscodingWriter::new(base, encoding))
    };

    let mut builder = csv::WriterBuilder::new();
    builder
        .delimiter(delimiter)
        .quote_style(QuoteStyle::Necessary)
        .double_quote(true);
    Ok(builder.from_writer(writer))
}

/// Writes the frame's names and rows, with `na` standing in for missing
/// values. Returns the number of data rows written.
pub fn write_frame<W: Write>(frame: &Frame, writer: &mut csv::Writer<W>, na: &str) -> Result<usize> {
    writer
        .write_record(frame.names())
        .context("Writing header row")?;
    for row in 0..frame.nrows() {
        writer
            .write_record(frame.row_strings(row, na))
            .with_context(|| format!("Writing row {}", row + 1))?;
    }
    writer.flush().context("Flushing output")?;
    Ok(frame.nrows())
}

struct TranscodingWriter<W: Write> {
    inner: W,
    encoding: &'static Encoding,
    buffer: Vec<u8>,
}

impl<W: Write> TranscodingWriter<W> {
    fn new(inner: W, encoding: &'static Encoding) -> Self {
        Self {
            inner,
            encoding,
            buffer: Vec::new(),
        }
    }

    /// Encodes the longest valid UTF-8 prefix of the buffer, keeping a
    /// trailing partial character for the next write unless `force`.
    fn flush_buffer(&mut self, force: bool) -> io::Result<()> {
        let valid_up_to = match std::str::from_utf8(&self.buffer) {
            Ok(_) => self.buffer.len(),
            Err(err) if err.error_len().is_some() => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "Invalid UTF-8 sequence in output stream",
                ));
            }
            Err(err) => err.valid_up_to(),
        };
        if valid_up_to > 0 {
            let pending: Vec<u8> = self.buffer.drain(..valid_up_to).collect();
            let text = std::str::from_utf8(&pending)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            let (encoded, _, had_errors) = self.encoding.encode(text);
            if had_errors {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("Failed to encode text using {}", self.encoding.name()),
                ));
            }
            self.inner.write_all(encoded.as_ref())?;
        }
        if force && !self.buffer.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "Incomplete UTF-8 sequence at end of output stream",
            ));
        }
        Ok(())
    }
}

impl<W: Write> Write for TranscodingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        self.flush_buffer(false)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_buffer(true)?;
        self.inner.flush()
    }
}
