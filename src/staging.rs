//! Per-worker row staging and the shared per-column string buffers.
//!
//! Workers stage each chunk row-major into three buffers grouped by value
//! width. Strings are first recorded as [`LenOff`] spans into the input and
//! later copied into a [`StrBuf`], one per string column, whose growth is
//! serialized against concurrent copies by a [`UsageGate`].

use std::{
    cell::UnsafeCell,
    ptr,
    sync::atomic::{AtomicBool, AtomicI32, AtomicPtr, AtomicUsize, Ordering},
};

use crate::{
    field::{QuoteRule, unescape_into},
    schema::RowLayout,
    types::NA_STRING_LEN,
};

/// Shared flag telling in-flight scans of a pass to stop.
#[derive(Debug, Default)]
pub struct CancelToken(AtomicBool);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

const OFFSET_MASK: u64 = 0x7FFF_FFFF;
pub const MAX_STAGED_OFFSET: usize = OFFSET_MASK as usize;

/// Length and offset of a string value, packed into one 8-byte slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LenOff {
    pub len: i32,
    pub off: u32,
    /// Content still holds quote escapes.
    pub escaped: bool,
}

impl LenOff {
    pub const NA: LenOff = LenOff {
        len: NA_STRING_LEN,
        off: 0,
        escaped: false,
    };

    pub fn pack(self) -> u64 {
        u64::from(self.len as u32)
            | ((u64::from(self.off) & OFFSET_MASK) << 32)
            | (u64::from(self.escaped) << 63)
    }

    pub fn unpack(bits: u64) -> Self {
        LenOff {
            len: bits as u32 as i32,
            off: ((bits >> 32) & OFFSET_MASK) as u32,
            escaped: bits >> 63 == 1,
        }
    }

    pub fn is_na(self) -> bool {
        self.len == NA_STRING_LEN
    }
}

/// A string column's bytes for one chunk, before and after the ordered
/// section assigns where they go in the shared [`StrBuf`].
#[derive(Debug, Default)]
pub struct LocalStrings {
    pub column: usize,
    pub slot: usize,
    pub bytes: Vec<u8>,
    /// Offset within the column's StrBuf, claimed in the ordered section.
    pub base: Option<usize>,
    pub claim: Option<Claim>,
}

pub struct ThreadContext<'a> {
    pub thread_index: usize,
    pub quote: u8,
    pub quote_rule: QuoteRule,
    pub cancel: &'a CancelToken,
    pub layout: &'a RowLayout,
    /// Input position of the chunk start; staged string offsets are relative
    /// to it until [`ThreadContext::stage_strings`] runs.
    pub anchor: usize,
    pub chunk_index: usize,
    pub buf8: Vec<u64>,
    pub buf4: Vec<u32>,
    pub buf1: Vec<u8>,
    pub nrows: usize,
    /// First output row of this chunk, known once the ordered section ran.
    pub row_start: Option<usize>,
    pub strings: Vec<LocalStrings>,
    strings_staged: bool,
}

impl<'a> ThreadContext<'a> {
    pub fn new(
        thread_index: usize,
        layout: &'a RowLayout,
        cancel: &'a CancelToken,
        quote: u8,
        quote_rule: QuoteRule,
    ) -> Self {
        let strings = layout
            .strings
            .iter()
            .map(|&(column, slot)| LocalStrings {
                column,
                slot,
                ..LocalStrings::default()
            })
            .collect();
        ThreadContext {
            thread_index,
            quote,
            quote_rule,
            cancel,
            layout,
            anchor: 0,
            chunk_index: 0,
            buf8: Vec::new(),
            buf4: Vec::new(),
            buf1: Vec::new(),
            nrows: 0,
            row_start: None,
            strings,
            strings_staged: false,
        }
    }

    /// Clears staged rows for a new chunk starting at `anchor`.
    pub fn reset(&mut self, chunk_index: usize, anchor: usize) {
        self.chunk_index = chunk_index;
        self.anchor = anchor;
        self.nrows = 0;
        self.row_start = None;
        self.strings_staged = false;
        self.buf8.clear();
        self.buf4.clear();
        self.buf1.clear();
        for strings in &mut self.strings {
            strings.bytes.clear();
            strings.base = None;
            strings.claim = None;
        }
    }

    /// Appends a zeroed row and returns its index.
    pub fn begin_row(&mut self) -> usize {
        let row = self.nrows;
        self.buf8.resize(self.buf8.len() + self.layout.stride8, 0);
        self.buf4.resize(self.buf4.len() + self.layout.stride4, 0);
        self.buf1.resize(self.buf1.len() + self.layout.stride1, 0);
        self.nrows += 1;
        row
    }

    /// Drops every staged row from `rows` onwards.
    pub fn truncate(&mut self, rows: usize) {
        if rows >= self.nrows {
            return;
        }
        self.nrows = rows;
        self.buf8.truncate(rows * self.layout.stride8);
        self.buf4.truncate(rows * self.layout.stride4);
        self.buf1.truncate(rows * self.layout.stride1);
        if self.strings_staged {
            let stride = self.layout.stride8;
            for strings in &mut self.strings {
                let kept = (0..rows)
                    .rev()
                    .map(|row| LenOff::unpack(self.buf8[row * stride + strings.slot]))
                    .find(|span| !span.is_na())
                    .map_or(0, |span| span.off as usize + span.len as usize);
                strings.bytes.truncate(kept);
            }
        }
    }

    pub fn put8(&mut self, row: usize, slot: usize, bits: u64) {
        self.buf8[row * self.layout.stride8 + slot] = bits;
    }

    pub fn put4(&mut self, row: usize, slot: usize, bits: u32) {
        self.buf4[row * self.layout.stride4 + slot] = bits;
    }

    pub fn put1(&mut self, row: usize, slot: usize, bits: u8) {
        self.buf1[row * self.layout.stride1 + slot] = bits;
    }

    pub fn get8(&self, row: usize, slot: usize) -> u64 {
        self.buf8[row * self.layout.stride8 + slot]
    }

    pub fn get4(&self, row: usize, slot: usize) -> u32 {
        self.buf4[row * self.layout.stride4 + slot]
    }

    pub fn get1(&self, row: usize, slot: usize) -> u8 {
        self.buf1[row * self.layout.stride1 + slot]
    }

    /// Copies every staged string out of `input` into the per-column local
    /// buffers, unescaping as needed, and rewrites the spans to point there.
    pub fn stage_strings(&mut self, input: &[u8]) {
        let stride = self.layout.stride8;
        for strings in &mut self.strings {
            strings.bytes.clear();
            for row in 0..self.nrows {
                let at = row * stride + strings.slot;
                let span = LenOff::unpack(self.buf8[at]);
                if span.is_na() {
                    continue;
                }
                let start = self.anchor + span.off as usize;
                let content = &input[start..start + span.len as usize];
                let local = strings.bytes.len();
                if span.escaped {
                    unescape_into(content, self.quote, self.quote_rule, &mut strings.bytes);
                } else {
                    strings.bytes.extend_from_slice(content);
                }
                let len = strings.bytes.len() - local;
                self.buf8[at] = LenOff {
                    len: len as i32,
                    off: local as u32,
                    escaped: false,
                }
                .pack();
            }
        }
        self.strings_staged = true;
    }

    /// Resolved `(offset, len)` of a staged string after its chunk claimed
    /// space in the column's [`StrBuf`]. `None` for NA.
    pub fn string_span(&self, string_index: usize, row: usize) -> Option<(u64, i32)> {
        let strings = &self.strings[string_index];
        let span = LenOff::unpack(self.get8(row, strings.slot));
        if span.is_na() {
            return None;
        }
        let base = strings.base.unwrap_or(0) as u64;
        Some((base + u64::from(span.off), span.len))
    }
}

/// Gate states: any number of concurrent copiers, or one resizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Readers(u32),
    Exclusive,
}

const EXCLUSIVE: i32 = -1;

#[derive(Debug, Default)]
pub struct UsageGate(AtomicI32);

impl UsageGate {
    pub fn state(&self) -> GateState {
        match self.0.load(Ordering::Acquire) {
            EXCLUSIVE => GateState::Exclusive,
            n => GateState::Readers(n as u32),
        }
    }

    /// Waits until no resize is in flight, then registers a copier.
    pub fn acquire_read(&self) -> ReadGuard<'_> {
        let mut backoff = Backoff::default();
        loop {
            let current = self.0.load(Ordering::Acquire);
            if current >= 0
                && self
                    .0
                    .compare_exchange_weak(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
            {
                return ReadGuard { gate: self };
            }
            backoff.snooze();
        }
    }

    /// Waits until there are no copiers, then takes the gate for a resize.
    pub fn acquire_exclusive(&self) -> ExclusiveGuard<'_> {
        let mut backoff = Backoff::default();
        while self
            .0
            .compare_exchange_weak(0, EXCLUSIVE, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            backoff.snooze();
        }
        ExclusiveGuard { gate: self }
    }

    fn release_read(&self) {
        let previous = self.0.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0);
    }

    fn release_exclusive(&self) {
        let previous = self.0.swap(0, Ordering::AcqRel);
        debug_assert_eq!(previous, EXCLUSIVE);
    }
}

pub struct ReadGuard<'a> {
    gate: &'a UsageGate,
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.gate.release_read();
    }
}

pub struct ExclusiveGuard<'a> {
    gate: &'a UsageGate,
}

impl Drop for ExclusiveGuard<'_> {
    fn drop(&mut self) {
        self.gate.release_exclusive();
    }
}

#[derive(Default)]
struct Backoff {
    step: u32,
}

impl Backoff {
    const SPIN_LIMIT: u32 = 6;

    fn snooze(&mut self) {
        if self.step <= Self::SPIN_LIMIT {
            for _ in 0..1 << self.step {
                std::hint::spin_loop();
            }
            self.step += 1;
        } else {
            std::thread::yield_now();
        }
    }
}

/// Growable byte buffer for one string column, shared by every worker of a
/// pass.
///
/// Space is claimed only from inside the ordered section, so claims are
/// serialized and ranges never overlap. Copies into claimed ranges happen
/// concurrently under a shared [`ReadGuard`]; a claim that needs more room
/// waits for those copies to drain before reallocating.
pub struct StrBuf {
    pub column: usize,
    pub slot: usize,
    gate: UsageGate,
    storage: UnsafeCell<Vec<u8>>,
    base: AtomicPtr<u8>,
    capacity: AtomicUsize,
    used: AtomicUsize,
}

// SAFETY: `storage` is only touched through `&mut` while the gate is held
// exclusively. Copiers write through `base` under a shared guard, into byte
// ranges handed out once each by `claim`, so no two threads write the same
// byte and no write overlaps a reallocation.
unsafe impl Sync for StrBuf {}

impl StrBuf {
    pub fn new(column: usize, slot: usize, initial_capacity: usize) -> Self {
        let mut storage = vec![0u8; initial_capacity];
        let base = storage.as_mut_ptr();
        StrBuf {
            column,
            slot,
            gate: UsageGate::default(),
            storage: UnsafeCell::new(storage),
            base: AtomicPtr::new(base),
            capacity: AtomicUsize::new(initial_capacity),
            used: AtomicUsize::new(0),
        }
    }

    pub fn used(&self) -> usize {
        self.used.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Acquire)
    }

    pub fn gate_state(&self) -> GateState {
        self.gate.state()
    }

    /// Reserves `len` bytes. The returned [`Claim`] is the only way to write
    /// into them.
    pub fn claim(&self, len: usize) -> Claim {
        let offset = self.used.fetch_add(len, Ordering::AcqRel);
        let required = offset + len;
        while required > self.capacity() {
            let _exclusive = self.gate.acquire_exclusive();
            // SAFETY: the exclusive guard guarantees no copier holds `base`.
            let storage = unsafe { &mut *self.storage.get() };
            if storage.len() < required {
                let grown = required.max(storage.len().saturating_mul(2)).max(4096);
                storage.resize(grown, 0);
                self.base.store(storage.as_mut_ptr(), Ordering::Release);
                self.capacity.store(storage.len(), Ordering::Release);
            }
        }
        Claim { offset, len }
    }

    /// Copies `bytes` into the claimed range.
    pub fn write(&self, claim: Claim, bytes: &[u8]) {
        assert_eq!(claim.len, bytes.len(), "string copy does not match its claim");
        if bytes.is_empty() {
            return;
        }
        let _shared = self.gate.acquire_read();
        let capacity = self.capacity.load(Ordering::Acquire);
        assert!(
            claim.offset + bytes.len() <= capacity,
            "string copy outside claimed range"
        );
        let base = self.base.load(Ordering::Acquire);
        // SAFETY: the range lies within the allocation (checked above), was
        // handed out once by `claim`, and cannot be reallocated while the
        // shared guard is held.
        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), base.add(claim.offset), bytes.len());
        }
    }

    /// Takes the claimed bytes once every copier is done.
    pub fn into_bytes(self) -> Vec<u8> {
        let used = self.used.load(Ordering::Acquire);
        let mut storage = self.storage.into_inner();
        storage.truncate(used);
        storage
    }
}

/// A byte range reserved in a [`StrBuf`]. Not `Clone`: each range is written
/// exactly once.
#[derive(Debug, PartialEq, Eq)]
pub struct Claim {
    offset: usize,
    len: usize,
}

impl Claim {
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// The StrBufs of a pass, in string-column order.
pub struct StrBufs {
    bufs: Vec<StrBuf>,
}

impl StrBufs {
    pub fn new(layout: &RowLayout, capacity_hint: usize) -> Self {
        let bufs = layout
            .strings
            .iter()
            .map(|&(column, slot)| StrBuf::new(column, slot, capacity_hint))
            .collect();
        StrBufs { bufs }
    }

    /// Claims room for every string column of the context's chunk.
    pub fn claim_for(&self, ctx: &mut ThreadContext<'_>) {
        for (buf, strings) in self.bufs.iter().zip(ctx.strings.iter_mut()) {
            let claim = buf.claim(strings.bytes.len());
            strings.base = Some(claim.offset());
            strings.claim = Some(claim);
        }
    }

    /// Copies the context's staged strings into their claimed ranges.
    pub fn write_from(&self, ctx: &mut ThreadContext<'_>) {
        for (buf, strings) in self.bufs.iter().zip(ctx.strings.iter_mut()) {
            if let Some(claim) = strings.claim.take() {
                buf.write(claim, &strings.bytes);
            }
        }
    }

    /// `(column, bytes)` for every string column.
    pub fn into_columns(self) -> Vec<(usize, Vec<u8>)> {
        self.bufs
            .into_iter()
            .map(|buf| (buf.column, buf.into_bytes()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ColumnType;

    #[test]
    fn lenoff_packs_into_one_slot() {
        let span = LenOff {
            len: 17,
            off: 0x1234_5678,
            escaped: true,
        };
        assert_eq!(LenOff::unpack(span.pack()), span);
        assert!(LenOff::unpack(LenOff::NA.pack()).is_na());
        let empty = LenOff {
            len: 0,
            off: 3,
            escaped: false,
        };
        assert!(!LenOff::unpack(empty.pack()).is_na());
    }

    #[test]
    fn gate_tracks_readers_and_exclusive() {
        let gate = UsageGate::default();
        {
            let _a = gate.acquire_read();
            let _b = gate.acquire_read();
            assert_eq!(gate.state(), GateState::Readers(2));
        }
        assert_eq!(gate.state(), GateState::Readers(0));
        {
            let _x = gate.acquire_exclusive();
            assert_eq!(gate.state(), GateState::Exclusive);
        }
        assert_eq!(gate.state(), GateState::Readers(0));
    }

    #[test]
    fn claims_are_contiguous_and_growth_preserves_bytes() {
        let buf = StrBuf::new(0, 0, 4);
        let first = buf.claim(3);
        buf.write(first, b"abc");
        let second = buf.claim(10_000);
        assert_eq!(second.offset(), 3);
        buf.write(second, &vec![b'z'; 10_000]);
        assert!(buf.capacity() >= 10_003);
        let bytes = buf.into_bytes();
        assert_eq!(&bytes[..3], b"abc");
        assert_eq!(bytes.len(), 10_003);
    }

    #[test]
    fn stage_strings_unescapes_into_local_buffer() {
        let input = b"xx\"a\"\"b\",plain";
        let layout = RowLayout::new(&[ColumnType::String]);
        let cancel = CancelToken::new();
        let mut ctx = ThreadContext::new(0, &layout, &cancel, b'"', QuoteRule::Doubled);
        ctx.reset(0, 2);
        let row = ctx.begin_row();
        ctx.put8(row, 0, LenOff { len: 4, off: 1, escaped: true }.pack());
        let row = ctx.begin_row();
        ctx.put8(row, 0, LenOff { len: 5, off: 7, escaped: false }.pack());
        let row = ctx.begin_row();
        ctx.put8(row, 0, LenOff::NA.pack());
        ctx.stage_strings(input);
        assert_eq!(ctx.strings[0].bytes, b"a\"bplain");
        ctx.strings[0].base = Some(100);
        assert_eq!(ctx.string_span(0, 0), Some((100, 3)));
        assert_eq!(ctx.string_span(0, 1), Some((103, 5)));
        assert_eq!(ctx.string_span(0, 2), None);

        ctx.truncate(1);
        assert_eq!(ctx.strings[0].bytes, b"a\"b");
    }

    #[test]
    fn truncate_drops_trailing_rows() {
        let layout = RowLayout::new(&[ColumnType::Int64, ColumnType::Int32Bare, ColumnType::Bool8]);
        let cancel = CancelToken::new();
        let mut ctx = ThreadContext::new(0, &layout, &cancel, b'"', QuoteRule::Doubled);
        for value in 0..5u64 {
            let row = ctx.begin_row();
            ctx.put8(row, 0, value);
        }
        ctx.truncate(2);
        assert_eq!(ctx.nrows, 2);
        assert_eq!(ctx.buf8.len(), 2);
        assert_eq!(ctx.buf4.len(), 2);
        assert_eq!(ctx.get8(1, 0), 1);
    }
}
