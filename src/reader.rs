//! Drives a read: sampling, then one or more parallel passes over the body
//! until a pass finishes without needing any column widened.
//!
//! Within a pass, workers scan chunks in any order but enter the ordered
//! section strictly by chunk index. That section checks the chunk started
//! where its predecessor ended, resolves type bumps and stops, and assigns
//! the chunk's first output row. String copies and the transpose into the
//! sink happen after it, concurrently.

use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use itertools::Itertools;
use log::{debug, info, log, warn};
use parking_lot::Mutex;
use serde::Serialize;

use crate::{
    chunk::{Chunk, plan_chunks, target_chunk_bytes},
    config::RunConfig,
    error::{ReadError, ReadResult, ReadWarning},
    field::Dialect,
    output::{Frame, OutputSink},
    sampler::{self, Detected},
    scanner::{ChunkScan, ScanOutcome, ScanParams, TypeBump, scan_chunk},
    schema::{ColumnSpec, RowLayout, Schema, check_override},
    sequencer::Sequencer,
    staging::{CancelToken, StrBufs, ThreadContext},
    types::ColumnType,
};

const PROGRESS_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Sampling,
    Scanning(usize),
    Restart,
    Committed,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadSummary {
    pub dialect: Dialect,
    pub header: bool,
    pub columns: Vec<ColumnSpec>,
    pub rows: usize,
    pub estimated_rows: usize,
    pub passes: usize,
    /// Column types each pass scanned with.
    pub type_history: Vec<Vec<ColumnType>>,
    pub threads: usize,
    pub chunks: usize,
    pub warnings: Vec<ReadWarning>,
}

pub struct Reader<'a> {
    input: &'a [u8],
    config: RunConfig,
}

enum PassOutcome {
    Complete {
        rows: usize,
        chunks: usize,
        warning: Option<ReadWarning>,
        strings: StrBufs,
    },
    Restart {
        bumps: Vec<TypeBump>,
    },
}

/// Bookkeeping only touched from inside the ordered section.
struct Ledger {
    committed: usize,
    /// Where the last admitted chunk actually ended; `None` once a chunk
    /// was skipped, after which nothing later can be verified.
    prev_end: Option<usize>,
    stopped: bool,
    restart: bool,
    bumps: Vec<TypeBump>,
    warning: Option<ReadWarning>,
    fatal: Option<ReadError>,
}

impl Ledger {
    fn new(body_start: usize) -> Self {
        Ledger {
            committed: 0,
            prev_end: Some(body_start),
            stopped: false,
            restart: false,
            bumps: Vec::new(),
            warning: None,
            fatal: None,
        }
    }

    fn merge_bumps(&mut self, bumps: &[TypeBump]) {
        for bump in bumps {
            match self.bumps.iter_mut().find(|b| b.column == bump.column) {
                Some(existing) => existing.required = existing.required.max(bump.required),
                None => self.bumps.push(*bump),
            }
        }
    }
}

/// State shared by every worker of one pass.
struct Pass<'p, S: OutputSink> {
    params: ScanParams<'p>,
    chunks: &'p [Chunk],
    next_chunk: AtomicUsize,
    sequencer: Sequencer,
    cancel: &'p CancelToken,
    strings: &'p StrBufs,
    ledger: Mutex<Ledger>,
    sink: &'p S,
}

impl<S: OutputSink> Pass<'_, S> {
    fn work(&self, thread_index: usize) {
        let dialect = self.params.dialect;
        let mut ctx = ThreadContext::new(
            thread_index,
            self.params.layout,
            self.cancel,
            dialect.quote,
            dialect.quote_rule,
        );
        self.sink.prepare_thread_context(&mut ctx);
        loop {
            let index = self.next_chunk.fetch_add(1, Ordering::AcqRel);
            let Some(chunk) = self.chunks.get(index).copied() else {
                break;
            };
            let outcome = if self.cancel.is_cancelled() {
                ScanOutcome::Abandoned
            } else {
                scan_chunk(&mut ctx, &self.params, chunk.index, chunk.start, chunk.end)
            };
            if let ScanOutcome::Finished(scan) = &outcome {
                self.stage(&mut ctx, scan);
            }
            let commit = {
                let _turn = self.sequencer.enter(index);
                self.ordered(&mut ctx, chunk, outcome)
            };
            if commit {
                self.strings.write_from(&mut ctx);
                self.sink.push_buffer(&ctx);
            }
        }
        self.sink.free_thread_context(&mut ctx);
    }

    fn stage(&self, ctx: &mut ThreadContext<'_>, scan: &ChunkScan) {
        if scan.bumps.is_empty() {
            self.stage_values(ctx);
        }
    }

    fn stage_values(&self, ctx: &mut ThreadContext<'_>) {
        ctx.stage_strings(self.params.input);
        self.sink.postprocess_buffer(ctx);
    }

    /// Body of the ordered section. Returns whether the chunk's rows were
    /// committed and must be pushed.
    fn ordered(&self, ctx: &mut ThreadContext<'_>, chunk: Chunk, outcome: ScanOutcome) -> bool {
        let mut ledger = self.ledger.lock();
        if ledger.stopped {
            ledger.prev_end = None;
            return false;
        }
        let (Some(prev_end), ScanOutcome::Finished(mut scan)) = (ledger.prev_end, outcome) else {
            ledger.prev_end = None;
            return false;
        };

        if prev_end != chunk.start {
            debug!(
                "Chunk {} planned at byte {} but previous chunk ended at {}; rescanning",
                chunk.index, chunk.start, prev_end
            );
            match scan_chunk(ctx, &self.params, chunk.index, prev_end, chunk.end.max(prev_end)) {
                ScanOutcome::Finished(rescanned) => {
                    self.stage(ctx, &rescanned);
                    scan = rescanned;
                }
                ScanOutcome::Abandoned => {
                    ledger.prev_end = None;
                    return false;
                }
            }
        }
        ledger.prev_end = Some(scan.end);

        // Bumps and stops past the row limit belong to rows that are dropped
        // anyway, so they must not decide the result.
        let room = self
            .params
            .config
            .nrow_limit
            .map_or(usize::MAX, |limit| limit.saturating_sub(ledger.committed));
        let staged = scan.bumps.is_empty();
        scan.bumps.retain(|bump| bump.row < room);
        let stop = scan.stop.filter(|stop| stop.row < room);

        if !scan.bumps.is_empty() {
            ledger.merge_bumps(&scan.bumps);
            ledger.restart = true;
            self.cancel.cancel();
            return false;
        }
        if ledger.restart {
            return false;
        }
        if !staged {
            self.stage_values(ctx);
        }

        if let Some(stop) = stop {
            let ncol = self.params.layout.ncol();
            let row = ledger.committed + ctx.nrows + 1;
            ledger.stopped = true;
            self.cancel.cancel();
            match stop.kind.found() {
                Some(found) => {
                    let warning = ReadWarning::StoppedEarly {
                        row,
                        offset: stop.offset,
                        expected: ncol,
                        found,
                    };
                    if self.params.config.warnings_are_errors {
                        ledger.fatal = Some(ReadError::Warning(warning));
                        return false;
                    }
                    ledger.warning = Some(warning);
                }
                None => {
                    ledger.fatal = Some(ReadError::Malformed {
                        row,
                        offset: stop.offset,
                        reason: stop.kind.describe(ncol),
                    });
                    return false;
                }
            }
        }

        if ctx.nrows >= room {
            ctx.truncate(room);
            ledger.stopped = true;
            self.cancel.cancel();
        }

        ctx.row_start = Some(ledger.committed);
        ledger.committed += ctx.nrows;
        self.strings.claim_for(ctx);
        self.sink.order_buffer(ctx);
        true
    }

    /// Runs on the driving thread while workers scan.
    fn watch(&self) {
        let total = self.chunks.len();
        let mut reached = 0;
        while reached < total {
            reached = self.sequencer.wait_for(total, PROGRESS_INTERVAL);
            if self.params.config.show_progress {
                self.sink.report_progress(100.0 * reached as f64 / total as f64);
            }
        }
    }
}

impl<'a> Reader<'a> {
    pub fn new(input: &'a [u8], config: RunConfig) -> ReadResult<Self> {
        config.validate()?;
        Ok(Reader { input, config })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn detect(&self) -> ReadResult<Detected> {
        sampler::detect(self.input, &self.config)
    }

    /// Reads the whole input into `sink`.
    pub fn read_into<S: OutputSink>(&self, sink: &mut S) -> ReadResult<ReadSummary> {
        let config = &self.config;
        let mut phase = Phase::Sampling;
        log!(config.detail_level(), "Phase {phase:?}");
        let detected = self.detect()?;
        let mut warnings = Vec::new();
        for warning in &detected.warnings {
            self.raise(warning.clone(), &mut warnings)?;
        }

        let inferred: Vec<ColumnSpec> = detected
            .names
            .iter()
            .zip(&detected.types)
            .map(|(name, ty)| ColumnSpec::new(name.clone(), *ty))
            .collect();
        let mut requested = inferred.clone();
        if !sink.override_schema(&mut requested) {
            return Err(ReadError::Aborted);
        }
        check_override(&inferred, &requested)?;
        let mut schema = Schema::new(requested, detected.header);

        let threads = config.resolved_threads();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("csv-columnar-{i}"))
            .build()
            .map_err(|err| ReadError::Internal(format!("building worker pool: {err}")))?;

        let body = &self.input[..detected.body_end];
        let alloc_rows = config
            .nrow_limit
            .map_or(detected.estimated_rows, |limit| detected.estimated_rows.min(limit));
        let target_bytes = target_chunk_bytes(config, detected.mean_line_len);
        let mut type_history = Vec::new();

        loop {
            let pass = type_history.len() + 1;
            phase = Phase::Scanning(pass);
            log!(config.detail_level(), "Phase {phase:?}");

            let layout = schema.layout();
            if sink.allocate(&layout, alloc_rows) == 0 && alloc_rows > 0 {
                return Err(ReadError::AllocationFailed {
                    ncols: layout.ncol(),
                    nrows: alloc_rows,
                });
            }
            type_history.push(schema.types());

            if config.nrow_limit == Some(0) {
                sink.set_final_row_count(0);
                return Ok(self.finish(&detected, &schema, 0, 0, threads, type_history, warnings));
            }

            let chunks = plan_chunks(
                body,
                detected.body_start,
                threads,
                target_bytes,
                &detected.dialect,
                schema.len(),
                config.fill,
            );
            log!(
                config.detail_level(),
                "Pass {pass}: {} chunk(s) over {} byte(s) on {threads} thread(s)",
                chunks.len(),
                body.len() - detected.body_start
            );

            match self.run_pass(&pool, sink, body, &detected, &layout.rows, &chunks)? {
                PassOutcome::Complete {
                    rows,
                    chunks,
                    warning,
                    strings,
                } => {
                    sink.set_final_row_count(rows);
                    for (column, bytes) in strings.into_columns() {
                        sink.adopt_strings(column, bytes);
                    }
                    if let Some(warning) = warning {
                        self.raise(warning, &mut warnings)?;
                    }
                    phase = Phase::Committed;
                    log!(config.detail_level(), "Phase {phase:?}");
                    return Ok(self.finish(
                        &detected,
                        &schema,
                        rows,
                        chunks,
                        threads,
                        type_history,
                        warnings,
                    ));
                }
                PassOutcome::Restart { bumps } => {
                    sink.set_final_row_count(0);
                    phase = Phase::Restart;
                    log!(config.detail_level(), "Phase {phase:?}");
                    let mut changed = Vec::new();
                    for bump in &bumps {
                        let before = schema.columns[bump.column].datatype;
                        if schema.promote(bump.column, bump.required) {
                            changed.push(format!(
                                "'{}' {} -> {}",
                                schema.columns[bump.column].name,
                                before,
                                schema.columns[bump.column].datatype
                            ));
                        }
                    }
                    if changed.is_empty() {
                        return Err(ReadError::Internal(
                            "restart requested without any column promotion".to_string(),
                        ));
                    }
                    info!(
                        "Re-reading after pass {pass}: widened {}",
                        changed.iter().join(", ")
                    );
                }
            }
        }
    }

    fn run_pass<S: OutputSink>(
        &self,
        pool: &rayon::ThreadPool,
        sink: &S,
        body: &[u8],
        detected: &Detected,
        layout: &RowLayout,
        chunks: &[Chunk],
    ) -> ReadResult<PassOutcome> {
        let cancel = CancelToken::new();
        let per_column = (body.len() - detected.body_start) / layout.ncol().max(1);
        let strings = StrBufs::new(layout, per_column.min(1 << 24));
        let pass = Pass {
            params: ScanParams {
                input: body,
                dialect: &detected.dialect,
                config: &self.config,
                layout,
            },
            chunks,
            next_chunk: AtomicUsize::new(0),
            sequencer: Sequencer::new(),
            cancel: &cancel,
            strings: &strings,
            ledger: Mutex::new(Ledger::new(detected.body_start)),
            sink,
        };
        let workers = pool.current_num_threads().min(chunks.len()).max(1);
        pool.in_place_scope(|scope| {
            for thread_index in 0..workers {
                let pass = &pass;
                scope.spawn(move |_| pass.work(thread_index));
            }
            pass.watch();
        });

        let ledger = pass.ledger.into_inner();
        if let Some(err) = ledger.fatal {
            return Err(err);
        }
        if ledger.restart {
            return Ok(PassOutcome::Restart {
                bumps: ledger.bumps,
            });
        }
        Ok(PassOutcome::Complete {
            rows: ledger.committed,
            chunks: chunks.len(),
            warning: ledger.warning,
            strings,
        })
    }

    fn raise(&self, warning: ReadWarning, warnings: &mut Vec<ReadWarning>) -> ReadResult<()> {
        if self.config.warnings_are_errors {
            return Err(ReadError::Warning(warning));
        }
        warn!("{warning}");
        warnings.push(warning);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        detected: &Detected,
        schema: &Schema,
        rows: usize,
        chunks: usize,
        threads: usize,
        type_history: Vec<Vec<ColumnType>>,
        warnings: Vec<ReadWarning>,
    ) -> ReadSummary {
        info!(
            "Read {rows} row(s) x {} column(s) in {} pass(es)",
            schema.columns.iter().filter(|c| !c.datatype.is_dropped()).count(),
            type_history.len()
        );
        ReadSummary {
            dialect: detected.dialect,
            header: detected.header,
            columns: schema.columns.clone(),
            rows,
            estimated_rows: detected.estimated_rows,
            passes: type_history.len(),
            type_history,
            threads,
            chunks,
            warnings,
        }
    }
}

/// Reads `input` into a fresh [`Frame`].
pub fn read_bytes(input: &[u8], config: RunConfig) -> ReadResult<(Frame, ReadSummary)> {
    let mut frame = Frame::new().with_progress(config.show_progress);
    let summary = Reader::new(input, config)?.read_into(&mut frame)?;
    Ok((frame, summary))
}
