use std::sync::atomic::{AtomicUsize, Ordering};

use csv_columnar::{
    sequencer::Sequencer,
    staging::{GateState, StrBuf},
};
use sha2::{Digest, Sha256};

const CHUNKS: usize = 2_000;

fn chunk_payload(index: usize) -> Vec<u8> {
    let len = (index * 37) % 300;
    (0..len).map(|i| b'a' + ((index + i) % 26) as u8).collect()
}

fn serial_digest() -> Vec<u8> {
    let mut hasher = Sha256::new();
    for index in 0..CHUNKS {
        hasher.update(chunk_payload(index));
    }
    hasher.finalize().to_vec()
}

/// Claims in chunk order under the sequencer, copies outside it, while a
/// tiny initial capacity forces repeated growth during the copies.
fn concurrent_fill(threads: usize) -> StrBuf {
    let buf = StrBuf::new(0, 0, 16);
    let sequencer = Sequencer::new();
    let next = AtomicUsize::new(0);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .expect("pool")
        .scope(|scope| {
            for _ in 0..threads {
                scope.spawn(|_| {
                    loop {
                        let index = next.fetch_add(1, Ordering::AcqRel);
                        if index >= CHUNKS {
                            break;
                        }
                        let payload = chunk_payload(index);
                        let claim = {
                            let _turn = sequencer.enter(index);
                            buf.claim(payload.len())
                        };
                        buf.write(claim, &payload);
                    }
                });
            }
        });
    buf
}

#[test]
fn concurrent_copies_match_serial_checksum() {
    let expected = serial_digest();
    for threads in [1, 2, 4, 8] {
        let buf = concurrent_fill(threads);
        assert_eq!(buf.gate_state(), GateState::Readers(0));
        assert!(buf.capacity() >= buf.used());
        let bytes = buf.into_bytes();
        assert_eq!(Sha256::digest(&bytes).to_vec(), expected, "threads={threads}");
    }
}
