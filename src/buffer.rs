//! Bounded circular buffer of filtered sensor samples.
//!
//! One producer (the sensor filter task) and many readers. Writers never
//! block: a full buffer drops its oldest slot. `peek_latest` is the
//! canonical non-blocking read used by every periodic consumer; the
//! blocking `read` exists for harness use and drains in FIFO order.

use parking_lot::{Condvar, Mutex};

use crate::types::FilteredSample;

pub const BUFFER_CAPACITY: usize = 200;

struct BufferState {
    slots: [FilteredSample; BUFFER_CAPACITY],
    read_index: usize,
    write_index: usize,
    count: usize,
    overwrites: u64,
}

pub struct RingBuffer {
    state: Mutex<BufferState>,
    not_empty: Condvar,
}

impl RingBuffer {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BufferState {
                slots: [FilteredSample::default(); BUFFER_CAPACITY],
                read_index: 0,
                write_index: 0,
                count: 0,
                overwrites: 0,
            }),
            not_empty: Condvar::new(),
        }
    }

    /// Pushes a sample, dropping the oldest slot when full. Never blocks.
    pub fn write(&self, sample: FilteredSample) {
        {
            let mut state = self.state.lock();

            if state.count == BUFFER_CAPACITY {
                state.read_index = (state.read_index + 1) % BUFFER_CAPACITY;
                state.count -= 1;
                state.overwrites += 1;
                if state.overwrites % 100 == 0 {
                    log::warn!(target: "CB", "event=overwrite,count={}", state.overwrites);
                }
            }

            let at = state.write_index;
            state.slots[at] = sample;
            state.write_index = (state.write_index + 1) % BUFFER_CAPACITY;
            state.count += 1;
        }

        self.not_empty.notify_one();
    }

    /// Removes and returns the oldest sample, waiting for a write if the
    /// buffer is empty.
    pub fn read(&self) -> FilteredSample {
        let mut state = self.state.lock();
        while state.count == 0 {
            self.not_empty.wait(&mut state);
        }

        let sample = state.slots[state.read_index];
        state.read_index = (state.read_index + 1) % BUFFER_CAPACITY;
        state.count -= 1;
        sample
    }

    /// Copy of the most recently written sample; a zeroed sample when empty.
    pub fn peek_latest(&self) -> FilteredSample {
        let state = self.state.lock();
        if state.count == 0 {
            return FilteredSample::default();
        }

        let latest = (state.write_index + BUFFER_CAPACITY - 1) % BUFFER_CAPACITY;
        state.slots[latest]
    }

    pub fn size(&self) -> usize {
        self.state.lock().count
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn is_full(&self) -> bool {
        self.size() == BUFFER_CAPACITY
    }
}

impl Default for RingBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(n: i32) -> FilteredSample {
        FilteredSample {
            position_x: n,
            timestamp_ms: n as i64,
            ..FilteredSample::default()
        }
    }

    #[test]
    fn peek_on_empty_returns_zeroed_sample() {
        let buffer = RingBuffer::new();
        assert_eq!(buffer.peek_latest(), FilteredSample::default());
        assert!(buffer.is_empty());
    }

    #[test]
    fn peek_returns_most_recent_write() {
        let buffer = RingBuffer::new();
        for n in 1..=5 {
            buffer.write(sample(n));
            assert_eq!(buffer.peek_latest().position_x, n);
        }
        assert_eq!(buffer.size(), 5);
    }

    #[test]
    fn read_drains_in_fifo_order() {
        let buffer = RingBuffer::new();
        for n in 1..=10 {
            buffer.write(sample(n));
        }
        for n in 1..=10 {
            assert_eq!(buffer.read().position_x, n);
        }
        assert!(buffer.is_empty());
    }

    #[test]
    fn overwrite_drops_oldest_and_keeps_capacity() {
        let buffer = RingBuffer::new();
        let extra = 50;
        for n in 1..=(BUFFER_CAPACITY as i32 + extra) {
            buffer.write(sample(n));
        }

        assert_eq!(buffer.size(), BUFFER_CAPACITY);
        assert!(buffer.is_full());
        assert_eq!(
            buffer.peek_latest().position_x,
            BUFFER_CAPACITY as i32 + extra
        );

        // Writes 1..=extra were overwritten; the drain starts at extra + 1.
        for n in (extra + 1)..=(BUFFER_CAPACITY as i32 + extra) {
            assert_eq!(buffer.read().position_x, n);
        }
        assert!(buffer.is_empty());
    }

    #[test]
    fn boundary_write_deletes_first_element() {
        let buffer = RingBuffer::new();
        for n in 1..=(BUFFER_CAPACITY as i32) {
            buffer.write(sample(n));
        }
        assert!(buffer.is_full());

        buffer.write(sample(BUFFER_CAPACITY as i32 + 1));
        assert_eq!(buffer.size(), BUFFER_CAPACITY);
        assert_eq!(buffer.read().position_x, 2);
    }

    #[test]
    fn blocking_read_wakes_on_write() {
        use std::sync::Arc;
        use std::time::Duration;

        let buffer = Arc::new(RingBuffer::new());
        let reader = {
            let buffer = buffer.clone();
            std::thread::spawn(move || buffer.read())
        };

        std::thread::sleep(Duration::from_millis(20));
        buffer.write(sample(7));

        assert_eq!(reader.join().unwrap().position_x, 7);
    }
}
