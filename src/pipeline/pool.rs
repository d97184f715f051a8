//! Parallel detection with in-order delivery.
//!
//! The calling thread decodes and feeds a bounded frame channel. Worker threads
//! share the receiving end, run the adapter and drop each frame's pixels as
//! soon as its detections exist. A collector thread restores storage order
//! with a `ReorderBuffer` before handing records to the consumer.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver};
use std::sync::{Arc, Mutex};
use std::thread;

use crate::detect::{Detection, DetectorAdapter};
use crate::error::AnalysisError;
use crate::frame::Frame;

use super::CancelFlag;

/// Detections for one frame, still in storage order.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectedFrame {
    pub index: u64,
    pub width: u32,
    pub height: u32,
    pub detections: Vec<Detection>,
}

/// Holds out-of-order items until the next expected index arrives.
#[derive(Debug)]
pub struct ReorderBuffer<T> {
    pending: BTreeMap<u64, T>,
    next_index: u64,
}

impl<T> ReorderBuffer<T> {
    pub fn new() -> Self {
        Self {
            pending: BTreeMap::new(),
            next_index: 0,
        }
    }

    /// Insert the item for `index` and return every item now in sequence.
    pub fn push(&mut self, index: u64, item: T) -> Vec<T> {
        self.pending.insert(index, item);
        let mut ready = Vec::new();
        while let Some(item) = self.pending.remove(&self.next_index) {
            ready.push(item);
            self.next_index += 1;
        }
        ready
    }

    /// Items waiting on an earlier index.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn next_index(&self) -> u64 {
        self.next_index
    }
}

impl<T> Default for ReorderBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Totals reported once the stream is drained.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolStats {
    pub frames_decoded: u64,
    pub frames_delivered: u64,
}

/// Run detection over `frames` on `workers` threads.
///
/// `consume` sees every frame exactly once, in storage order. The first
/// failure (decode, inference or cancellation) stops all threads.
pub fn detect_in_order<I, C>(
    frames: I,
    adapter: &DetectorAdapter,
    workers: usize,
    cancel: &CancelFlag,
    consume: C,
) -> Result<PoolStats, AnalysisError>
where
    I: Iterator<Item = Result<Frame, AnalysisError>>,
    C: FnMut(DetectedFrame) + Send,
{
    let workers = workers.max(1);
    let stop = AtomicBool::new(false);
    let stopped = || stop.load(Ordering::SeqCst) || cancel.is_cancelled();

    let (frame_tx, frame_rx) = sync_channel::<Frame>(workers * 2);
    let (result_tx, result_rx) =
        sync_channel::<Result<DetectedFrame, AnalysisError>>(workers * 2);
    // Shared so the receiver drops with the last worker and unblocks the decoder.
    let frame_rx = Arc::new(Mutex::new(frame_rx));

    thread::scope(|scope| {
        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            let frame_rx = Arc::clone(&frame_rx);
            let result_tx = result_tx.clone();
            let stopped = &stopped;
            handles.push(scope.spawn(move || {
                while !stopped() {
                    let Some(frame) = next_frame(&frame_rx) else {
                        break;
                    };
                    let detected = adapter.detect(&frame).map(|detections| DetectedFrame {
                        index: frame.index,
                        width: frame.width,
                        height: frame.height,
                        detections,
                    });
                    log::debug!(
                        "worker {}: frame {} ({} bytes) done",
                        worker,
                        frame.index,
                        frame.byte_len()
                    );
                    drop(frame);
                    if result_tx.send(detected).is_err() {
                        break;
                    }
                }
            }));
        }
        drop(result_tx);
        drop(frame_rx);

        let collector = scope.spawn(|| collect(result_rx, &stop, cancel, consume));

        let mut decoded = 0u64;
        let mut decode_error = None;
        for item in frames {
            if stopped() {
                break;
            }
            match item {
                Ok(frame) => {
                    decoded += 1;
                    if frame_tx.send(frame).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    decode_error = Some(err);
                    stop.store(true, Ordering::SeqCst);
                    break;
                }
            }
        }
        drop(frame_tx);

        let mut panicked = false;
        for handle in handles {
            panicked |= handle.join().is_err();
        }
        let collected = collector.join().map_err(|_| AnalysisError::Inference {
            frame: decoded,
            reason: "detection collector panicked".to_string(),
        })?;

        if cancel.is_cancelled() {
            return Err(AnalysisError::Cancelled);
        }
        let delivered = collected?;
        if let Some(err) = decode_error {
            return Err(err);
        }
        if panicked || delivered != decoded {
            return Err(AnalysisError::Inference {
                frame: delivered,
                reason: "detection worker stopped before the stream ended".to_string(),
            });
        }
        Ok(PoolStats {
            frames_decoded: decoded,
            frames_delivered: delivered,
        })
    })
}

fn next_frame(frame_rx: &Mutex<Receiver<Frame>>) -> Option<Frame> {
    let guard = frame_rx.lock().ok()?;
    guard.recv().ok()
}

/// Drains results, reorders them and feeds `consume`. Keeps draining after a
/// failure so no worker blocks on a full channel.
fn collect<C>(
    results: Receiver<Result<DetectedFrame, AnalysisError>>,
    stop: &AtomicBool,
    cancel: &CancelFlag,
    mut consume: C,
) -> Result<u64, AnalysisError>
where
    C: FnMut(DetectedFrame),
{
    let mut buffer = ReorderBuffer::new();
    let mut failure = None;
    let mut delivered = 0u64;

    for result in results {
        if failure.is_some() || cancel.is_cancelled() {
            continue;
        }
        match result {
            Ok(frame) => {
                for ready in buffer.push(frame.index, frame) {
                    consume(ready);
                    delivered += 1;
                }
            }
            Err(err) => {
                log::warn!("detection failed: {}", err);
                stop.store(true, Ordering::SeqCst);
                failure = Some(err);
            }
        }
    }

    match failure {
        Some(err) => Err(err),
        None => {
            if buffer.pending() > 0 {
                log::warn!(
                    "{} detection results never became contiguous after frame {}",
                    buffer.pending(),
                    buffer.next_index()
                );
            }
            Ok(delivered)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingBox, DetectorSettings, StubBackend};

    fn frames(count: u64) -> impl Iterator<Item = Result<Frame, AnalysisError>> {
        (0..count).map(|index| Ok(Frame::new(vec![0u8; 2 * 2 * 3], 2, 2, index).unwrap()))
    }

    fn adapter(stub: StubBackend) -> DetectorAdapter {
        DetectorAdapter::new(Arc::new(stub), &DetectorSettings::default())
    }

    #[test]
    fn reorder_buffer_releases_contiguous_runs() {
        let mut buffer = ReorderBuffer::new();
        assert!(buffer.push(1, "b").is_empty());
        assert!(buffer.push(2, "c").is_empty());
        assert_eq!(buffer.pending(), 2);
        assert_eq!(buffer.push(0, "a"), vec!["a", "b", "c"]);
        assert_eq!(buffer.next_index(), 3);
        assert_eq!(buffer.push(3, "d"), vec!["d"]);
    }

    #[test]
    fn delivers_every_frame_in_order() {
        let mut stub = StubBackend::new();
        for index in 0..40u64 {
            stub = stub.with_frame(
                index,
                vec![Detection::ball(
                    BoundingBox::new(index as f32, 0.0, 8.0, 8.0),
                    0.9,
                )],
            );
        }
        let adapter = adapter(stub);
        let mut seen = Vec::new();
        let stats = detect_in_order(frames(40), &adapter, 4, &CancelFlag::new(), |frame| {
            seen.push((frame.index, frame.detections[0].bbox.x))
        })
        .unwrap();

        assert_eq!(stats.frames_decoded, 40);
        assert_eq!(stats.frames_delivered, 40);
        let expected: Vec<(u64, f32)> = (0..40).map(|i| (i, i as f32)).collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn inference_failure_stops_the_pool() {
        let adapter = adapter(StubBackend::new().failing_on(5));
        let err = detect_in_order(frames(100), &adapter, 3, &CancelFlag::new(), |_| {}).unwrap_err();
        assert!(matches!(err, AnalysisError::Inference { frame: 5, .. }));
    }

    #[test]
    fn decode_failure_is_reported() {
        let adapter = adapter(StubBackend::new());
        let broken = frames(3).chain(std::iter::once(Err(AnalysisError::UnreadableVideo(
            "truncated".into(),
        ))));
        let err = detect_in_order(broken, &adapter, 2, &CancelFlag::new(), |_| {}).unwrap_err();
        assert!(matches!(err, AnalysisError::UnreadableVideo(_)));
    }

    #[test]
    fn cancel_mid_stream_stops_every_thread() {
        let adapter = adapter(StubBackend::new());
        let cancel = CancelFlag::new();
        let trigger = cancel.clone();
        let mut seen = 0u64;
        let err = detect_in_order(frames(1_000), &adapter, 4, &cancel, |frame| {
            seen += 1;
            if frame.index == 10 {
                trigger.cancel();
            }
        })
        .unwrap_err();

        assert!(matches!(err, AnalysisError::Cancelled));
        assert!(seen >= 11);
        assert!(seen < 1_000);
    }

    #[test]
    fn cancelled_before_start() {
        let adapter = adapter(StubBackend::new());
        let cancel = CancelFlag::new();
        cancel.cancel();
        let err = detect_in_order(frames(10), &adapter, 2, &cancel, |_| {}).unwrap_err();
        assert!(matches!(err, AnalysisError::Cancelled));
    }
}
