use std::sync::Arc;
use std::time::Duration;

use facet::Facet;
use spool_wire::FrameReader;

use crate::codec::{Codec, Postcard};
use crate::config::QueueConfig;
use crate::error::QueueError;
use crate::feeder;
use crate::shared::Shared;
use crate::staging::Staging;
use crate::ticket::QueueTicket;

/// A bounded queue shared between processes.
///
/// `put` returns as soon as capacity is available and the item is staged in
/// this process; a background feeder thread (one per process, started by the
/// first `put`) encodes it and streams it onto the channel in frames of at
/// most `chunk_size` bytes, so item size is not limited by the pipe buffer.
/// `get` reads one whole message under the read lock and decodes it.
///
/// Clones share everything. Processes share the capacity, the locks and the
/// channel; each process has its own staging buffer and feeder.
///
/// # Example
///
/// ```no_run
/// use spool::{Queue, QueueConfig};
///
/// let queue: Queue<String> = Queue::new(QueueConfig::default().with_capacity(16))?;
/// queue.put("hello".to_string())?;
/// assert_eq!(queue.get()?, "hello");
/// # Ok::<(), spool::QueueError>(())
/// ```
pub struct Queue<T, C = Postcard> {
    shared: Arc<Shared>,
    staging: Arc<Staging<T>>,
    codec: Arc<C>,
}

impl<T, C> Clone for Queue<T, C> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            staging: self.staging.clone(),
            codec: self.codec.clone(),
        }
    }
}

impl<T, C> std::fmt::Debug for Queue<T, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("shared", &self.shared)
            .finish_non_exhaustive()
    }
}

impl<T> Queue<T, Postcard>
where
    T: for<'a> Facet<'a> + Send + 'static,
{
    /// Create a queue using the default codec.
    pub fn new(config: QueueConfig) -> Result<Self, QueueError> {
        Self::with_codec(config, Postcard)
    }

    /// Attach to a queue created by an ancestor process, using the default
    /// codec.
    ///
    /// # Safety
    ///
    /// See [`attach_with_codec`](Self::attach_with_codec).
    pub unsafe fn attach(ticket: &QueueTicket) -> Result<Self, QueueError> {
        unsafe { Self::attach_with_codec(ticket, Postcard) }
    }
}

impl<T, C> Queue<T, C>
where
    T: Send + 'static,
    C: Codec<T>,
{
    /// Create a queue with an injected codec.
    pub fn with_codec(config: QueueConfig, codec: C) -> Result<Self, QueueError> {
        let shared = Shared::create(&config)?;
        Ok(Self::from_parts(shared, codec))
    }

    /// Attach to a queue created by an ancestor process.
    ///
    /// # Safety
    ///
    /// The ticket's descriptors must have been inherited by this process (see
    /// [`QueueTicket::apply_to_command`]) and not be owned by anything else
    /// here. They are closed when the last clone of the returned queue is
    /// dropped. Attach at most once per ticket.
    pub unsafe fn attach_with_codec(ticket: &QueueTicket, codec: C) -> Result<Self, QueueError> {
        let shared = unsafe { Shared::attach(ticket)? };
        Ok(Self::from_parts(shared, codec))
    }

    fn from_parts(shared: Shared, codec: C) -> Self {
        Self {
            shared: Arc::new(shared),
            staging: Arc::new(Staging::new()),
            codec: Arc::new(codec),
        }
    }

    /// Put an item, waiting as long as it takes for capacity.
    pub fn put(&self, item: T) -> Result<(), QueueError> {
        self.put_with(item, true, None)
    }

    /// Put an item only if capacity is available right now.
    pub fn put_nowait(&self, item: T) -> Result<(), QueueError> {
        self.put_with(item, false, None)
    }

    /// Put an item, waiting at most `timeout` for capacity.
    pub fn put_timeout(&self, item: T, timeout: Duration) -> Result<(), QueueError> {
        self.put_with(item, true, Some(timeout))
    }

    /// Admit `item` and stage it for the feeder.
    ///
    /// Fails with [`QueueError::Full`] if no capacity became available
    /// (`block = false` never waits; `timeout` bounds a blocking wait). On
    /// success the item is buffered in this process, not yet on the channel.
    /// Fails with [`QueueError::Closed`] if this process's feeder has stopped
    /// after a write failure.
    pub fn put_with(&self, item: T, block: bool, timeout: Option<Duration>) -> Result<(), QueueError> {
        if !self.shared.gate.acquire(block, timeout)? {
            return Err(QueueError::Full);
        }

        let buffer = self.staging.buffer();
        let mut state = buffer.lock();
        if state.closed || state.feeder.as_ref().is_some_and(|feeder| feeder.is_finished()) {
            drop(state);
            self.shared.release_gate();
            return Err(QueueError::Closed);
        }
        if state.feeder.is_none() {
            match feeder::spawn(buffer.clone(), self.shared.clone(), self.codec.clone()) {
                Ok(handle) => state.feeder = Some(handle),
                Err(e) => {
                    drop(state);
                    self.shared.release_gate();
                    return Err(e.into());
                }
            }
        }
        state.items.push_back(item);
        drop(state);

        buffer.notify();
        Ok(())
    }

    /// Take the next item, waiting as long as it takes.
    ///
    /// Returns [`QueueError::Closed`] once every write end of the channel is
    /// closed and nothing is left to read.
    pub fn get(&self) -> Result<T, QueueError> {
        self.get_with(true, None)
    }

    /// Only `block = true` with no timeout is implemented; every other
    /// combination fails with [`QueueError::Unsupported`] without touching
    /// the queue.
    pub fn get_with(&self, block: bool, timeout: Option<Duration>) -> Result<T, QueueError> {
        if !block || timeout.is_some() {
            return Err(QueueError::Unsupported);
        }

        let bytes = {
            let _guard = self.shared.read_lock.lock()?;
            FrameReader::new(&self.shared.reader, self.shared.chunk_size).read_message()?
        };
        self.shared.release_gate();

        tracing::trace!(len = bytes.len(), "read queue message");
        self.codec
            .decode(&bytes)
            .map_err(|e| QueueError::Decode(Box::new(e)))
    }

    /// Maximum number of admitted but undelivered items.
    pub fn capacity(&self) -> u32 {
        self.shared.capacity
    }

    /// Largest frame this queue writes.
    pub fn chunk_size(&self) -> usize {
        self.shared.chunk_size
    }

    /// Items admitted by some `put` and not yet taken by a `get`, in any
    /// process. A snapshot.
    pub fn outstanding(&self) -> Result<u32, QueueError> {
        let available = self.shared.gate.value()?;
        Ok(self.shared.capacity.saturating_sub(available))
    }

    /// Descriptors for handing this queue to a child process.
    pub fn ticket(&self) -> QueueTicket {
        self.shared.ticket()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{FnCodec, Raw};
    use std::collections::HashMap;
    use std::os::fd::AsRawFd;
    use std::sync::Barrier;
    use std::thread;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    }

    #[test]
    fn round_trips_one_item() {
        init_tracing();
        let queue: Queue<(String, u32)> = Queue::new(QueueConfig::default()).unwrap();
        queue.put(("one".to_string(), 1)).unwrap();
        assert_eq!(queue.get().unwrap(), ("one".to_string(), 1));
    }

    #[test]
    fn preserves_put_order() {
        init_tracing();
        let queue: Queue<u64> = Queue::new(QueueConfig::default().with_chunk_size(3)).unwrap();
        for i in 0..200 {
            queue.put(i).unwrap();
        }
        for i in 0..200 {
            assert_eq!(queue.get().unwrap(), i);
        }
    }

    #[test]
    fn full_queue_rejects_until_a_get() {
        init_tracing();
        let queue: Queue<u8> = Queue::new(QueueConfig::default().with_capacity(2)).unwrap();
        queue.put(1).unwrap();
        queue.put_nowait(2).unwrap();

        assert!(queue.put_nowait(3).unwrap_err().is_full());
        assert!(
            queue
                .put_timeout(3, Duration::from_millis(20))
                .unwrap_err()
                .is_full()
        );
        assert_eq!(queue.outstanding().unwrap(), 2);

        assert_eq!(queue.get().unwrap(), 1);
        queue.put_nowait(3).unwrap();
        assert_eq!(queue.get().unwrap(), 2);
        assert_eq!(queue.get().unwrap(), 3);
        assert_eq!(queue.outstanding().unwrap(), 0);
    }

    #[test]
    fn blocked_put_resumes_after_get() {
        init_tracing();
        let queue: Queue<u8> = Queue::new(QueueConfig::default().with_capacity(1)).unwrap();
        queue.put(1).unwrap();

        let producer = {
            let queue = queue.clone();
            thread::spawn(move || queue.put(2))
        };
        thread::sleep(Duration::from_millis(50));
        assert!(!producer.is_finished());

        assert_eq!(queue.get().unwrap(), 1);
        producer.join().unwrap().unwrap();
        assert_eq!(queue.get().unwrap(), 2);
    }

    #[test]
    fn chunk_size_does_not_change_results() {
        init_tracing();
        let small = vec![7u8; 5];
        let large: Vec<u8> = (0..100_000u32).map(|i| (i % 253) as u8).collect();
        for chunk_size in [1, 4096] {
            let queue: Queue<Vec<u8>, Raw> =
                Queue::with_codec(QueueConfig::default().with_chunk_size(chunk_size), Raw).unwrap();
            queue.put(small.clone()).unwrap();
            queue.put(large.clone()).unwrap();
            assert_eq!(queue.get().unwrap(), small, "chunk size {chunk_size}");
            assert_eq!(queue.get().unwrap(), large, "chunk size {chunk_size}");
        }
    }

    #[test]
    fn payload_larger_than_pipe_buffer() {
        init_tracing();
        let queue: Queue<Vec<u64>> = Queue::new(QueueConfig::default()).unwrap();
        let item: Vec<u64> = (0..1_000_000).collect();
        queue.put(item.clone()).unwrap();
        assert_eq!(queue.get().unwrap(), item);
    }

    #[test]
    fn zero_length_payload_round_trips() {
        init_tracing();
        let queue: Queue<Vec<u8>, Raw> = Queue::with_codec(QueueConfig::default(), Raw).unwrap();
        queue.put(Vec::new()).unwrap();
        queue.put(vec![1]).unwrap();
        assert!(queue.get().unwrap().is_empty());
        assert_eq!(queue.get().unwrap(), vec![1]);
    }

    #[test]
    fn only_blocking_get_without_timeout_is_supported() {
        let queue: Queue<u8> = Queue::new(QueueConfig::default()).unwrap();
        queue.put(9).unwrap();
        for (block, timeout) in [
            (false, None),
            (false, Some(Duration::from_secs(1))),
            (true, Some(Duration::ZERO)),
            (true, Some(Duration::from_secs(1))),
        ] {
            assert!(matches!(
                queue.get_with(block, timeout),
                Err(QueueError::Unsupported)
            ));
        }
        assert_eq!(queue.get().unwrap(), 9);
    }

    #[derive(Debug)]
    struct Odd(u32);

    impl std::fmt::Display for Odd {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{} is odd", self.0)
        }
    }

    impl std::error::Error for Odd {}

    fn even_only() -> impl Codec<u32> {
        FnCodec::new(
            |v: &u32| {
                if v % 2 == 1 {
                    Err(Odd(*v))
                } else {
                    Ok(v.to_be_bytes().to_vec())
                }
            },
            |b: &[u8]| -> Result<u32, Odd> {
                let v = u32::from_be_bytes(b.try_into().map_err(|_| Odd(u32::MAX))?);
                if v % 4 == 2 { Err(Odd(v)) } else { Ok(v) }
            },
        )
    }

    #[test]
    fn encode_failure_gives_capacity_back() {
        init_tracing();
        let queue: Queue<u32, _> =
            Queue::with_codec(QueueConfig::default().with_capacity(1), even_only()).unwrap();
        queue.put(1).unwrap();
        // The rejected item frees its unit once the feeder drops it.
        queue.put_timeout(4, Duration::from_secs(5)).unwrap();
        assert_eq!(queue.get().unwrap(), 4);
    }

    #[test]
    fn decode_error_is_passed_through() {
        init_tracing();
        let queue: Queue<u32, _> =
            Queue::with_codec(QueueConfig::default().with_capacity(1), even_only()).unwrap();
        queue.put(6).unwrap();
        let err = queue.get().unwrap_err();
        match &err {
            QueueError::Decode(inner) => assert_eq!(inner.downcast_ref::<Odd>().map(|o| o.0), Some(6)),
            other => panic!("expected a decode error, got {other:?}"),
        }
        // The message was consumed, so its unit is back.
        queue.put_nowait(8).unwrap();
        assert_eq!(queue.get().unwrap(), 8);
    }

    #[test]
    fn concurrent_producers_never_mix_messages() {
        init_tracing();
        let queue: Queue<Vec<u8>, Raw> =
            Queue::with_codec(QueueConfig::default().with_capacity(8).with_chunk_size(2), Raw).unwrap();
        let producers: Vec<_> = (0..4u8)
            .map(|id| {
                let queue = queue.clone();
                thread::spawn(move || {
                    for len in 1..=25 {
                        queue.put(vec![id; len]).unwrap();
                    }
                })
            })
            .collect();

        let mut per_producer: HashMap<u8, Vec<usize>> = HashMap::new();
        for _ in 0..100 {
            let message = queue.get().unwrap();
            let id = message[0];
            assert!(message.iter().all(|&b| b == id), "mixed message");
            per_producer.entry(id).or_default().push(message.len());
        }
        for producer in producers {
            producer.join().unwrap();
        }

        for id in 0..4u8 {
            assert_eq!(per_producer[&id], (1..=25).collect::<Vec<_>>(), "producer {id}");
        }
    }

    #[test]
    fn clones_share_one_feeder() {
        let queue: Queue<u8> = Queue::new(QueueConfig::default()).unwrap();
        let other = queue.clone();
        queue.put(1).unwrap();
        other.put(2).unwrap();
        assert!(queue.staging.buffer().lock().feeder.is_some());
        assert!(Arc::ptr_eq(&queue.staging.buffer(), &other.staging.buffer()));
        assert_eq!(other.get().unwrap(), 1);
        assert_eq!(queue.get().unwrap(), 2);
    }

    #[test]
    fn concurrent_first_puts_start_one_feeder() {
        init_tracing();
        const PRODUCERS: u32 = 8;
        const PER_PRODUCER: u32 = 20;
        let queue: Queue<(u32, u32)> = Queue::new(QueueConfig::default()).unwrap();
        let start = Arc::new(Barrier::new(PRODUCERS as usize));

        let producers: Vec<_> = (0..PRODUCERS)
            .map(|id| {
                let queue = queue.clone();
                let start = start.clone();
                thread::spawn(move || {
                    start.wait();
                    for seq in 0..PER_PRODUCER {
                        queue.put((id, seq)).unwrap();
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }

        // Held by the staging slot, this handle and exactly one feeder.
        let buffer = queue.staging.buffer();
        assert!(buffer.lock().feeder.is_some());
        assert_eq!(Arc::strong_count(&buffer), 3);

        let mut next = vec![0; PRODUCERS as usize];
        for _ in 0..PRODUCERS * PER_PRODUCER {
            let (id, seq) = queue.get().unwrap();
            assert_eq!(seq, next[id as usize], "producer {id} out of order");
            next[id as usize] += 1;
        }
        assert!(next.iter().all(|&n| n == PER_PRODUCER));
    }

    #[test]
    fn stopped_feeder_gives_back_staged_capacity() {
        init_tracing();
        let queue: Queue<u8> = Queue::new(QueueConfig::default().with_capacity(3)).unwrap();

        // Keep the feeder parked on the write lock with the first item in hand.
        let write_guard = queue.shared.write_lock.lock().unwrap();
        queue.put(1).unwrap();
        queue.put(2).unwrap();
        queue.put(3).unwrap();
        assert_eq!(queue.outstanding().unwrap(), 3);

        // Swap the channel's write end for a read-only descriptor.
        let read_only = std::fs::File::open("/dev/null").unwrap();
        let swapped = unsafe { libc::dup2(read_only.as_raw_fd(), queue.shared.writer.as_raw_fd()) };
        assert!(swapped >= 0, "dup2 failed: {}", std::io::Error::last_os_error());
        drop(write_guard);

        let buffer = queue.staging.buffer();
        for _ in 0..500 {
            if buffer.lock().feeder.as_ref().is_some_and(|f| f.is_finished()) {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert!(buffer.lock().feeder.as_ref().is_some_and(|f| f.is_finished()));
        assert!(buffer.lock().closed);
        assert!(buffer.lock().items.is_empty());

        // Only the item that failed to write still holds its unit.
        assert_eq!(queue.outstanding().unwrap(), 1);
        assert!(matches!(queue.put_nowait(4), Err(QueueError::Closed)));
        assert_eq!(queue.outstanding().unwrap(), 1);
    }
}
