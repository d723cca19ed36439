//! Write queue between collection ticks and the store.
//!
//! Producers enqueue from any thread without blocking. A single worker
//! thread owns the drain loop: it wakes on the first pending entry, inserts
//! entries in FIFO order until the queue is empty, then sleeps until the next
//! enqueue. Because that worker is the only caller of [`RecordSink::insert`],
//! inserts never overlap and land in enqueue order.

use crate::core::record::Record;
use crate::storage::InsertOutcome;
use crate::transparency::SharedTransparencyLog;
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;

/// Destination of drained records.
///
/// Implementations must not fail loudly: a record that cannot be stored is
/// reported through the returned outcome.
pub trait RecordSink: Send + Sync {
    fn insert(&self, record: &Record) -> InsertOutcome;
}

impl<S: RecordSink + ?Sized> RecordSink for Arc<S> {
    fn insert(&self, record: &Record) -> InsertOutcome {
        (**self).insert(record)
    }
}

/// A record in transit, tagged with its enqueue order.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub sequence: u64,
    pub record: Record,
}

enum Message {
    Entry(QueueEntry),
    Flush(Sender<()>),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("Write queue is closed")]
    Closed,
    #[error("Timed out after {0:?} waiting for the write queue to drain")]
    FlushTimeout(Duration),
}

pub struct WriteQueue {
    sender: Option<Sender<Message>>,
    worker: Option<JoinHandle<()>>,
    draining: Arc<AtomicBool>,
    pending: Arc<AtomicUsize>,
    next_sequence: AtomicU64,
}

impl WriteQueue {
    /// Spawn the writer thread for `sink`.
    pub fn new<S>(sink: S, log: SharedTransparencyLog) -> std::io::Result<Self>
    where
        S: RecordSink + 'static,
    {
        let (sender, receiver) = unbounded();
        let draining = Arc::new(AtomicBool::new(false));
        let pending = Arc::new(AtomicUsize::new(0));

        let worker = {
            let draining = Arc::clone(&draining);
            let pending = Arc::clone(&pending);
            thread::Builder::new()
                .name("record-writer".to_string())
                .spawn(move || drain_loop(receiver, sink, log, draining, pending))?
        };

        Ok(Self {
            sender: Some(sender),
            worker: Some(worker),
            draining,
            pending,
            next_sequence: AtomicU64::new(0),
        })
    }

    /// Append a record to the tail. Never blocks.
    pub fn enqueue(&self, record: Record) -> Result<u64, QueueError> {
        let sender = self.sender.as_ref().ok_or(QueueError::Closed)?;
        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);

        self.pending.fetch_add(1, Ordering::SeqCst);
        if sender
            .send(Message::Entry(QueueEntry { sequence, record }))
            .is_err()
        {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(QueueError::Closed);
        }
        Ok(sequence)
    }

    /// Block until every record enqueued before this call has been handed
    /// to the sink, or `timeout` elapses.
    pub fn flush(&self, timeout: Duration) -> Result<(), QueueError> {
        let sender = self.sender.as_ref().ok_or(QueueError::Closed)?;
        let (ack_tx, ack_rx) = bounded(1);
        sender
            .send(Message::Flush(ack_tx))
            .map_err(|_| QueueError::Closed)?;

        match ack_rx.recv_timeout(timeout) {
            Ok(()) => Ok(()),
            Err(RecvTimeoutError::Timeout) => Err(QueueError::FlushTimeout(timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(QueueError::Closed),
        }
    }

    /// Records enqueued but not yet handed to the sink.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Whether a drain pass is in progress.
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    /// Stop accepting records, let the worker finish everything already
    /// queued, and join it.
    pub fn shutdown(mut self) {
        self.close();
    }

    fn close(&mut self) {
        // Dropping the only sender ends the drain loop once it runs dry.
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("Record writer thread panicked");
            }
        }
    }
}

impl Drop for WriteQueue {
    fn drop(&mut self) {
        self.close();
    }
}

fn drain_loop<S: RecordSink>(
    receiver: Receiver<Message>,
    sink: S,
    log: SharedTransparencyLog,
    draining: Arc<AtomicBool>,
    pending: Arc<AtomicUsize>,
) {
    while let Ok(first) = receiver.recv() {
        draining.store(true, Ordering::SeqCst);

        let mut next = Some(first);
        while let Some(message) = next {
            match message {
                Message::Entry(entry) => {
                    let outcome = sink.insert(&entry.record);
                    if !outcome.is_inserted() {
                        // Already logged by the sink; move on.
                        tracing::debug!(sequence = entry.sequence, "Discarding unstored record");
                    }
                    log.record_insert(&outcome);
                    pending.fetch_sub(1, Ordering::SeqCst);
                }
                Message::Flush(ack) => {
                    let _ = ack.send(());
                }
            }
            next = receiver.try_recv().ok();
        }

        draining.store(false, Ordering::SeqCst);
    }
    tracing::debug!("Write queue closed, drain loop exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::record::Status;
    use crate::storage::InsertStrategy;
    use crate::transparency::create_shared_log;
    use std::sync::Mutex;

    const WAIT: Duration = Duration::from_secs(10);

    fn record(brightness: f32) -> Record {
        Record {
            brightness,
            proximity: 0.0,
            acc_x: 0.0,
            acc_y: 0.0,
            acc_z: 0.0,
            gyro_x: 0.0,
            gyro_y: 0.0,
            gyro_z: 0.0,
            status: Status::Awake,
        }
    }

    fn inserted(id: i64) -> InsertOutcome {
        InsertOutcome::Inserted {
            id,
            strategy: InsertStrategy::Sequenced,
            lock_retries: 0,
        }
    }

    /// Records what it receives and flags overlapping calls.
    #[derive(Default)]
    struct InstrumentedSink {
        in_flight: AtomicBool,
        overlaps: AtomicUsize,
        received: Mutex<Vec<f32>>,
        delay: Duration,
    }

    impl RecordSink for InstrumentedSink {
        fn insert(&self, record: &Record) -> InsertOutcome {
            if self.in_flight.swap(true, Ordering::SeqCst) {
                self.overlaps.fetch_add(1, Ordering::SeqCst);
            }
            if !self.delay.is_zero() {
                thread::sleep(self.delay);
            }
            let id = {
                let mut received = self.received.lock().unwrap();
                received.push(record.brightness);
                received.len() as i64
            };
            self.in_flight.store(false, Ordering::SeqCst);
            inserted(id)
        }
    }

    #[test]
    fn test_fifo_order() {
        let sink = Arc::new(InstrumentedSink::default());
        let queue = WriteQueue::new(Arc::clone(&sink), create_shared_log()).unwrap();

        for i in 0..200 {
            assert_eq!(queue.enqueue(record(i as f32)).unwrap(), i);
        }
        queue.flush(WAIT).unwrap();

        let received = sink.received.lock().unwrap().clone();
        let expected: Vec<f32> = (0..200).map(|i| i as f32).collect();
        assert_eq!(received, expected);
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn test_concurrent_producers_never_overlap_writes() {
        let sink = Arc::new(InstrumentedSink {
            delay: Duration::from_micros(200),
            ..Default::default()
        });
        let log = create_shared_log();
        let queue = Arc::new(WriteQueue::new(Arc::clone(&sink), Arc::clone(&log)).unwrap());

        let producers: Vec<_> = (0..4)
            .map(|p| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for i in 0..50 {
                        queue.enqueue(record((p * 1000 + i) as f32)).unwrap();
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }
        queue.flush(WAIT).unwrap();

        assert_eq!(sink.overlaps.load(Ordering::SeqCst), 0);
        let received = sink.received.lock().unwrap().clone();
        assert_eq!(received.len(), 200);
        assert_eq!(log.stats().records_inserted, 200);

        // Per-producer order survives interleaving.
        for p in 0..4 {
            let mine: Vec<f32> = received
                .iter()
                .copied()
                .filter(|v| (*v as i32) / 1000 == p)
                .collect();
            assert_eq!(mine.len(), 50);
            assert!(mine.windows(2).all(|w| w[0] < w[1]));
        }
    }

    #[test]
    fn test_lost_records_do_not_stall_queue() {
        struct FlakySink {
            calls: AtomicUsize,
        }
        impl RecordSink for FlakySink {
            fn insert(&self, _record: &Record) -> InsertOutcome {
                let n = self.calls.fetch_add(1, Ordering::SeqCst);
                if n % 2 == 0 {
                    InsertOutcome::Lost { lock_retries: 0 }
                } else {
                    inserted(n as i64)
                }
            }
        }

        let sink = Arc::new(FlakySink {
            calls: AtomicUsize::new(0),
        });
        let log = create_shared_log();
        let queue = WriteQueue::new(Arc::clone(&sink), Arc::clone(&log)).unwrap();

        for i in 0..10 {
            queue.enqueue(record(i as f32)).unwrap();
        }
        queue.flush(WAIT).unwrap();

        assert_eq!(sink.calls.load(Ordering::SeqCst), 10);
        let stats = log.stats();
        assert_eq!(stats.records_inserted, 5);
        assert_eq!(stats.records_lost, 5);
    }

    #[test]
    fn test_shutdown_finishes_in_flight_drain() {
        let sink = Arc::new(InstrumentedSink {
            delay: Duration::from_millis(2),
            ..Default::default()
        });
        let queue = WriteQueue::new(Arc::clone(&sink), create_shared_log()).unwrap();

        for i in 0..25 {
            queue.enqueue(record(i as f32)).unwrap();
        }
        queue.shutdown();

        assert_eq!(sink.received.lock().unwrap().len(), 25);
    }

    #[test]
    fn test_flush_timeout() {
        let sink = Arc::new(InstrumentedSink {
            delay: Duration::from_millis(200),
            ..Default::default()
        });
        let queue = WriteQueue::new(Arc::clone(&sink), create_shared_log()).unwrap();

        queue.enqueue(record(1.0)).unwrap();
        let result = queue.flush(Duration::from_millis(10));
        assert_eq!(
            result,
            Err(QueueError::FlushTimeout(Duration::from_millis(10)))
        );

        queue.flush(WAIT).unwrap();
        assert!(!sink.received.lock().unwrap().is_empty());
    }

    #[test]
    fn test_drain_restarts_after_idle() {
        let sink = Arc::new(InstrumentedSink::default());
        let queue = WriteQueue::new(Arc::clone(&sink), create_shared_log()).unwrap();

        queue.enqueue(record(1.0)).unwrap();
        queue.flush(WAIT).unwrap();
        thread::sleep(Duration::from_millis(20));
        assert!(!queue.is_draining());

        queue.enqueue(record(2.0)).unwrap();
        queue.flush(WAIT).unwrap();
        assert_eq!(sink.received.lock().unwrap().clone(), vec![1.0, 2.0]);
    }
}
