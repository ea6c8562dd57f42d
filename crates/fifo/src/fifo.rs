//! Bounded pool of reusable I/Q sample buffers.
//!
//! The generator thread acquires empty buffers, fills them with
//! interleaved I/Q samples and enqueues them; the sink thread dequeues,
//! consumes and releases them. All buffers are preallocated at creation
//! time, so the steady state never allocates. A buffer is owned by
//! exactly one party at any instant: the freelist, the queue, the
//! producer or the consumer.
//!
//! One mutex guards both lists; four condition variables signal
//! queue-not-empty, queue-empty, freelist-not-empty and pool-full. The
//! `halt` operation drains the queue back onto the freelist and wakes
//! every waiter so both threads can exit cleanly.

use std::{
    collections::VecDeque,
    sync::{Condvar, Mutex},
};

/// Error returned when the pool cannot be preallocated.
#[derive(Debug, thiserror::Error)]
pub enum CreateError {
    /// The requested buffer memory could not be reserved.
    #[error("failed to allocate {count} buffers of {capacity} samples")]
    OutOfMemory { count: usize, capacity: usize },
    /// A pool of zero buffers cannot carry samples.
    #[error("buffer count must be non-zero")]
    ZeroBuffers,
}

/// Sample width of the buffers in a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleKind {
    /// 8-bit signed interleaved I/Q.
    I8,
    /// 16-bit signed interleaved I/Q.
    I16,
}

/// Interleaved I/Q payload of a buffer.
#[derive(Debug)]
pub enum Samples {
    I8(Box<[i8]>),
    I16(Box<[i16]>),
}

impl Samples {
    fn with_capacity(kind: SampleKind, capacity: usize) -> Result<Self, CreateError> {
        // try_reserve keeps the allocation fallible; a failed pool
        // creation is reported instead of aborting the process.
        match kind {
            SampleKind::I8 => {
                let mut v: Vec<i8> = Vec::new();
                v.try_reserve_exact(capacity).map_err(|_| CreateError::OutOfMemory {
                    count: 1,
                    capacity,
                })?;
                v.resize(capacity, 0);
                Ok(Self::I8(v.into_boxed_slice()))
            }
            SampleKind::I16 => {
                let mut v: Vec<i16> = Vec::new();
                v.try_reserve_exact(capacity).map_err(|_| CreateError::OutOfMemory {
                    count: 1,
                    capacity,
                })?;
                v.resize(capacity, 0);
                Ok(Self::I16(v.into_boxed_slice()))
            }
        }
    }

    /// Number of sample slots in the payload.
    pub fn capacity(&self) -> usize {
        match self {
            Self::I8(b) => b.len(),
            Self::I16(b) => b.len(),
        }
    }
}

/// One reusable buffer of interleaved I/Q samples.
///
/// `valid` counts the filled sample slots; it is reset to zero every
/// time the buffer is handed out by [`Fifo::acquire`].
#[derive(Debug)]
pub struct IqBuf {
    pub samples: Samples,
    pub valid: usize,
}

impl IqBuf {
    /// True once `valid` has reached the payload capacity.
    pub fn is_full(&self) -> bool {
        self.valid >= self.samples.capacity()
    }

    /// Stores one I/Q pair, converting from the accumulator width.
    /// 8-bit pools drop the four least significant bits to fit the
    /// accumulated amplitude into the sample range.
    pub fn push_iq(&mut self, i: i32, q: i32) {
        match &mut self.samples {
            Samples::I8(b) => {
                b[self.valid] = (i >> 4) as i8;
                b[self.valid + 1] = (q >> 4) as i8;
            }
            Samples::I16(b) => {
                b[self.valid] = i as i16;
                b[self.valid + 1] = q as i16;
            }
        }
        self.valid += 2;
    }
}

/// Shared list state behind the pool mutex.
#[derive(Debug, Default)]
struct State {
    /// Buffers filled by the producer, awaiting the consumer.
    queue: VecDeque<IqBuf>,
    /// Empty buffers available to the producer.
    freelist: Vec<IqBuf>,
    /// Set once every pool buffer has been in flight at the same time.
    filled_once: bool,
    /// Halt flag; once set, all blocking operations return immediately.
    halted: bool,
}

/// The bounded buffer pool.
#[derive(Debug)]
pub struct Fifo {
    state: Mutex<State>,
    not_empty: Condvar,
    empty: Condvar,
    free: Condvar,
    full: Condvar,
}

impl Fifo {
    /// Preallocates `count` buffers of `capacity` interleaved samples
    /// each. Nothing is allocated after this point.
    pub fn create(count: usize, capacity: usize, kind: SampleKind) -> Result<Self, CreateError> {
        if count == 0 {
            return Err(CreateError::ZeroBuffers);
        }
        let mut freelist = Vec::new();
        freelist
            .try_reserve_exact(count)
            .map_err(|_| CreateError::OutOfMemory { count, capacity })?;
        for _ in 0..count {
            freelist.push(IqBuf {
                samples: Samples::with_capacity(kind, capacity)
                    .map_err(|_| CreateError::OutOfMemory { count, capacity })?,
                valid: 0,
            });
        }
        Ok(Self {
            state: Mutex::new(State {
                queue: VecDeque::with_capacity(count),
                freelist,
                filled_once: false,
                halted: false,
            }),
            not_empty: Condvar::new(),
            empty: Condvar::new(),
            free: Condvar::new(),
            full: Condvar::new(),
        })
    }

    /// Takes an empty buffer off the freelist, blocking while none is
    /// available. Returns `None` once the pool has been halted.
    pub fn acquire(&self) -> Option<IqBuf> {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        while state.freelist.is_empty() && !state.halted {
            // Every buffer is in flight: the consumer-side pre-roll
            // wait can be satisfied now.
            state.filled_once = true;
            self.full.notify_all();
            state = self
                .free
                .wait(state)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
        if state.halted {
            return None;
        }
        let mut buf = state.freelist.pop()?;
        buf.valid = 0;
        Some(buf)
    }

    /// Appends a filled buffer to the queue tail. During halt the
    /// buffer goes straight back to the freelist.
    pub fn enqueue(&self, buf: IqBuf) {
        debug_assert!(buf.valid <= buf.samples.capacity());
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if state.halted {
            state.freelist.push(buf);
            return;
        }
        state.queue.push_back(buf);
        if state.queue.len() == 1 {
            self.not_empty.notify_one();
        }
    }

    /// Removes the oldest queued buffer, blocking while the queue is
    /// empty. Returns `None` once the pool has been halted.
    pub fn dequeue(&self) -> Option<IqBuf> {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        while state.queue.is_empty() && !state.halted {
            state = self
                .not_empty
                .wait(state)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
        if state.halted {
            return None;
        }
        let buf = state.queue.pop_front();
        if state.queue.is_empty() {
            self.empty.notify_all();
        }
        buf
    }

    /// Returns a consumed buffer to the freelist.
    pub fn release(&self, buf: IqBuf) {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let was_empty = state.freelist.is_empty();
        state.freelist.push(buf);
        if was_empty {
            self.free.notify_one();
        }
    }

    /// Blocks the caller until the queue has drained or the pool is
    /// halted. Used by the producer for a graceful shutdown.
    pub fn wait_empty(&self) {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        while !state.queue.is_empty() && !state.halted {
            state = self
                .empty
                .wait(state)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
    }

    /// Blocks the caller until the producer has filled the whole pool
    /// once (pre-roll) or the pool is halted.
    pub fn wait_full(&self) {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        while !state.filled_once && !state.halted {
            state = self
                .full
                .wait(state)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
    }

    /// Drains the queue back onto the freelist, marks the pool halted
    /// and wakes every waiter. All subsequent blocking operations
    /// return immediately.
    pub fn halt(&self) {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        while let Some(buf) = state.queue.pop_front() {
            state.freelist.push(buf);
        }
        state.halted = true;
        self.not_empty.notify_all();
        self.empty.notify_all();
        self.free.notify_all();
        self.full.notify_all();
    }

    /// True once [`Fifo::halt`] has been called.
    pub fn is_halted(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .halted
    }

    /// Number of buffers currently on the freelist.
    pub fn free_len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .freelist
            .len()
    }

    /// Number of buffers currently queued for the consumer.
    pub fn queue_len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .queue
            .len()
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread, time::Duration};

    use test_case::test_case;

    use super::*;

    #[test_case(SampleKind::I8; "8 bit pool")]
    #[test_case(SampleKind::I16; "16 bit pool")]
    fn buffers_start_on_the_freelist(kind: SampleKind) {
        let fifo = Fifo::create(4, 64, kind).unwrap();
        assert_eq!(fifo.free_len(), 4);
        assert_eq!(fifo.queue_len(), 0);
    }

    #[test]
    fn zero_buffers_is_rejected() {
        assert!(matches!(
            Fifo::create(0, 64, SampleKind::I8),
            Err(CreateError::ZeroBuffers)
        ));
    }

    #[test]
    fn acquire_resets_valid_length() {
        let fifo = Fifo::create(2, 8, SampleKind::I16).unwrap();
        let mut buf = fifo.acquire().unwrap();
        buf.push_iq(1, -1);
        buf.push_iq(2, -2);
        assert_eq!(buf.valid, 4);
        fifo.enqueue(buf);

        let buf = fifo.dequeue().unwrap();
        assert_eq!(buf.valid, 4);
        fifo.release(buf);

        let buf = fifo.acquire().unwrap();
        assert_eq!(buf.valid, 0);
    }

    #[test]
    fn eight_bit_samples_drop_low_bits() {
        let fifo = Fifo::create(1, 4, SampleKind::I8).unwrap();
        let mut buf = fifo.acquire().unwrap();
        buf.push_iq(0x7F0, -0x7F0);
        match &buf.samples {
            Samples::I8(b) => {
                assert_eq!(b[0], 0x7F);
                assert_eq!(b[1], -0x7F);
            }
            Samples::I16(_) => panic!("wrong sample kind"),
        }
    }

    #[test]
    fn ownership_is_exclusive_across_threads() {
        let fifo = Arc::new(Fifo::create(3, 16, SampleKind::I16).unwrap());
        let producer_fifo = Arc::clone(&fifo);
        let producer = thread::spawn(move || {
            for n in 0..50 {
                let mut buf = producer_fifo.acquire().unwrap();
                buf.push_iq(n, -n);
                producer_fifo.enqueue(buf);
            }
        });

        let consumer_fifo = Arc::clone(&fifo);
        let consumer = thread::spawn(move || {
            for n in 0..50 {
                let buf = consumer_fifo.dequeue().unwrap();
                match &buf.samples {
                    Samples::I16(b) => assert_eq!(i32::from(b[0]), n),
                    Samples::I8(_) => panic!("wrong sample kind"),
                }
                consumer_fifo.release(buf);
            }
        });

        producer.join().unwrap();
        consumer.join().unwrap();
        // Strict FIFO order held and every buffer came home.
        assert_eq!(fifo.free_len(), 3);
        assert_eq!(fifo.queue_len(), 0);
    }

    #[test]
    fn halt_unblocks_producer_and_consumer() {
        let fifo = Arc::new(Fifo::create(2, 16, SampleKind::I8).unwrap());

        // Exhaust the freelist so the producer would block.
        let a = fifo.acquire().unwrap();
        let b = fifo.acquire().unwrap();
        fifo.enqueue(a);
        fifo.enqueue(b);

        let blocked_producer = {
            let fifo = Arc::clone(&fifo);
            thread::spawn(move || fifo.acquire())
        };
        let blocked_consumer = {
            let fifo = Arc::clone(&fifo);
            thread::spawn(move || {
                // Drain both, then block on an empty queue.
                let x = fifo.dequeue().unwrap();
                let y = fifo.dequeue().unwrap();
                fifo.release(x);
                fifo.release(y);
                fifo.dequeue()
            })
        };

        thread::sleep(Duration::from_millis(50));
        fifo.halt();

        assert!(blocked_producer.join().unwrap().is_none());
        assert!(blocked_consumer.join().unwrap().is_none());
        // After halt every buffer sits on the freelist.
        assert_eq!(fifo.free_len(), 2);
        assert_eq!(fifo.queue_len(), 0);
    }

    #[test]
    fn halt_drains_queued_buffers_to_freelist() {
        let fifo = Fifo::create(4, 16, SampleKind::I16).unwrap();
        for _ in 0..3 {
            let buf = fifo.acquire().unwrap();
            fifo.enqueue(buf);
        }
        assert_eq!(fifo.queue_len(), 3);
        fifo.halt();
        assert_eq!(fifo.queue_len(), 0);
        assert_eq!(fifo.free_len(), 4);
        assert!(fifo.acquire().is_none());
        assert!(fifo.dequeue().is_none());
    }

    #[test]
    fn enqueue_after_halt_returns_buffer_to_freelist() {
        let fifo = Fifo::create(2, 16, SampleKind::I16).unwrap();
        let buf = fifo.acquire().unwrap();
        fifo.halt();
        fifo.enqueue(buf);
        assert_eq!(fifo.free_len(), 2);
        assert_eq!(fifo.queue_len(), 0);
    }

    #[test]
    fn wait_empty_returns_once_consumer_drains() {
        let fifo = Arc::new(Fifo::create(2, 16, SampleKind::I16).unwrap());
        let buf = fifo.acquire().unwrap();
        fifo.enqueue(buf);

        let waiter = {
            let fifo = Arc::clone(&fifo);
            thread::spawn(move || fifo.wait_empty())
        };
        thread::sleep(Duration::from_millis(20));
        let buf = fifo.dequeue().unwrap();
        fifo.release(buf);
        waiter.join().unwrap();
    }

    #[test]
    fn wait_full_completes_after_preroll() {
        let fifo = Arc::new(Fifo::create(2, 4, SampleKind::I16).unwrap());
        let waiter = {
            let fifo = Arc::clone(&fifo);
            thread::spawn(move || fifo.wait_full())
        };

        let producer = {
            let fifo = Arc::clone(&fifo);
            thread::spawn(move || {
                // Fill the whole pool, then keep the pressure on until
                // the consumer starts draining.
                for _ in 0..3 {
                    if let Some(buf) = fifo.acquire() {
                        fifo.enqueue(buf);
                    }
                }
            })
        };

        waiter.join().unwrap();
        let buf = fifo.dequeue().unwrap();
        fifo.release(buf);
        producer.join().unwrap();
        fifo.halt();
    }
}
