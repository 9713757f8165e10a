//! Admits chunks into the ordered section one at a time, in index order.

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
pub struct Sequencer {
    next: Mutex<usize>,
    advanced: Condvar,
}

impl Sequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until every chunk before `index` has left its turn.
    pub fn enter(&self, index: usize) -> Turn<'_> {
        let mut next = self.next.lock();
        while *next != index {
            debug_assert!(*next < index, "chunk {index} entered twice");
            self.advanced.wait(&mut next);
        }
        Turn {
            sequencer: self,
            index,
        }
    }

    /// Index of the next chunk allowed in.
    pub fn position(&self) -> usize {
        *self.next.lock()
    }

    /// Waits until `target` chunks have passed or `timeout` elapses, and
    /// returns the position reached.
    pub fn wait_for(&self, target: usize, timeout: Duration) -> usize {
        let mut next = self.next.lock();
        if *next < target {
            self.advanced.wait_for(&mut next, timeout);
        }
        *next
    }

    fn advance(&self, index: usize) {
        let mut next = self.next.lock();
        *next = index + 1;
        drop(next);
        self.advanced.notify_all();
    }
}

/// Held while a chunk is inside the ordered section; dropping it admits the
/// next chunk.
pub struct Turn<'a> {
    sequencer: &'a Sequencer,
    index: usize,
}

impl Drop for Turn<'_> {
    fn drop(&mut self) {
        self.sequencer.advance(self.index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn turns_run_in_index_order() {
        let sequencer = Arc::new(Sequencer::new());
        let order = Arc::new(Mutex::new(Vec::new()));
        let handles: Vec<_> = (0..8)
            .rev()
            .map(|index| {
                let sequencer = Arc::clone(&sequencer);
                let order = Arc::clone(&order);
                std::thread::spawn(move || {
                    let _turn = sequencer.enter(index);
                    order.lock().push(index);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*order.lock(), (0..8).collect::<Vec<_>>());
        assert_eq!(sequencer.position(), 8);
    }

    #[test]
    fn wait_for_times_out_without_progress() {
        let sequencer = Sequencer::new();
        assert_eq!(sequencer.wait_for(1, Duration::from_millis(5)), 0);
        drop(sequencer.enter(0));
        assert_eq!(sequencer.wait_for(1, Duration::from_millis(5)), 1);
    }
}
