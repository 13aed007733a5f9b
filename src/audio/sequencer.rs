//! # Outbound Audio Sequencer
//!
//! Serializes every outbound audio chunk to the telephony connection. The
//! telephony provider plays whatever frames it receives in whatever order
//! they arrive, so the one concurrency hazard this gateway must defend
//! against is two in-flight sends to the same connection. All AI audio
//! output funnels through this queue and a single-flight drain loop; nothing
//! else writes media frames.
//!
//! ## Guarantees:
//! - Chunks reach the sink in exact enqueue order
//! - At most one drain loop runs per session, ever
//! - A caller interruption purges the queue, emits `clear` + `mark`, and
//!   suppresses new chunks until the interruption window elapses

use crate::audio::wav;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

/// A control or media frame headed for the telephony connection.
///
/// The session's socket handler consumes these in order and turns them into
/// wire messages; the sequencer never touches the socket itself.
#[derive(Debug, Clone, PartialEq)]
pub enum TelephonyOutbound {
    /// Base64 μ-law audio ready for playback.
    Media { payload: String },
    /// Discard any playback the provider has buffered.
    Clear,
    /// Named synchronization marker echoed back by the provider.
    Mark { name: String },
}

struct SequencerInner {
    /// Pending base64 WAV chunks exactly as the AI emitted them.
    queue: Mutex<VecDeque<String>>,

    /// Re-entrancy guard: true while a drain loop is running.
    draining: AtomicBool,

    /// Barge-in flag; set by an interruption, auto-cleared after the window.
    interrupted: AtomicBool,

    /// Whether the one-time pre-playback flush has been sent this session.
    playback_flushed: AtomicBool,

    /// Chunks discarded because they could not be transcoded.
    dropped: AtomicU64,

    /// Telephony playback sample rate.
    target_rate: u32,

    /// How long the interruption flag stays set before new audio may resume.
    interruption_window: Duration,

    /// Ordered sink into the session's socket handler.
    sink: mpsc::Sender<TelephonyOutbound>,
}

/// Cheap-to-clone handle over the per-session outbound queue.
#[derive(Clone)]
pub struct OutboundSequencer {
    inner: Arc<SequencerInner>,
}

impl OutboundSequencer {
    pub fn new(
        sink: mpsc::Sender<TelephonyOutbound>,
        target_rate: u32,
        interruption_window: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(SequencerInner {
                queue: Mutex::new(VecDeque::new()),
                draining: AtomicBool::new(false),
                interrupted: AtomicBool::new(false),
                playback_flushed: AtomicBool::new(false),
                dropped: AtomicU64::new(0),
                target_rate,
                interruption_window,
                sink,
            }),
        }
    }

    /// Queue a base64 WAV chunk for ordered playback.
    ///
    /// Chunks arriving inside an interruption window are discarded; the AI
    /// was cut off and stale audio must not resume once the window closes.
    pub fn enqueue(&self, chunk: String) {
        if self.inner.interrupted.load(Ordering::SeqCst) {
            debug!("dropping AI audio chunk received during interruption window");
            return;
        }
        self.inner.queue.lock().unwrap().push_back(chunk);
        self.start_drain();
    }

    /// Start the drain loop unless one is already running.
    ///
    /// The compare-and-swap on `draining` is the single-flight guard: a
    /// second invocation while a loop is active is a no-op.
    fn start_drain(&self) {
        if self
            .inner
            .draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let sequencer = self.clone();
        tokio::spawn(async move { sequencer.drain_loop().await });
    }

    /// Pop, transcode, and send one chunk at a time until the queue empties,
    /// the sink closes, or an interruption lands.
    ///
    /// The interruption flag is checked before popping and again after each
    /// send; a chunk whose send has already started is allowed to complete.
    async fn drain_loop(&self) {
        loop {
            if self.inner.interrupted.load(Ordering::SeqCst) {
                break;
            }
            let chunk = self.inner.queue.lock().unwrap().pop_front();
            let Some(chunk) = chunk else { break };

            let frame = match BASE64.decode(chunk.as_bytes()) {
                Ok(bytes) => wav::wav_to_mulaw(&bytes, self.inner.target_rate),
                Err(_) => Vec::new(),
            };
            if frame.is_empty() {
                self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("dropping AI audio chunk that failed transcoding");
                continue;
            }

            // One flush of provider-buffered playback before the session's
            // very first media frame, never repeated per chunk.
            if !self.inner.playback_flushed.swap(true, Ordering::SeqCst)
                && self.inner.sink.send(TelephonyOutbound::Clear).await.is_err()
            {
                break;
            }

            let payload = BASE64.encode(&frame);
            if self
                .inner
                .sink
                .send(TelephonyOutbound::Media { payload })
                .await
                .is_err()
            {
                break;
            }
            if self.inner.interrupted.load(Ordering::SeqCst) {
                break;
            }
        }
        self.inner.draining.store(false, Ordering::SeqCst);

        // A chunk enqueued between the final empty pop and the guard reset
        // would otherwise sit until the next enqueue.
        if !self.inner.interrupted.load(Ordering::SeqCst)
            && !self.inner.queue.lock().unwrap().is_empty()
        {
            self.start_drain();
        }
    }

    /// Barge-in: purge pending chunks, stop the drain loop at its next
    /// checkpoint, and tell the provider to discard buffered playback.
    ///
    /// The `mark` frame after `clear` is the provider's side-channel signal
    /// that the flush actually happened; its echo is logged by the socket
    /// handler. The interruption flag resets after a fixed window so new AI
    /// output can resume playing.
    pub fn clear_and_halt(&self) {
        self.inner.queue.lock().unwrap().clear();
        self.inner.interrupted.store(true, Ordering::SeqCst);

        let inner = self.inner.clone();
        let mark_name = format!("barge-in-{}", Uuid::new_v4());
        tokio::spawn(async move {
            let _ = inner.sink.send(TelephonyOutbound::Clear).await;
            let _ = inner.sink.send(TelephonyOutbound::Mark { name: mark_name }).await;
            tokio::time::sleep(inner.interruption_window).await;
            inner.interrupted.store(false, Ordering::SeqCst);
        });
    }

    /// Session teardown: purge the queue and pin the interruption flag so an
    /// in-flight drain iteration exits at its next checkpoint.
    pub fn halt(&self) {
        self.inner.queue.lock().unwrap().clear();
        self.inner.interrupted.store(true, Ordering::SeqCst);
    }

    /// Number of chunks discarded due to transcode failures.
    pub fn dropped_chunks(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    fn queue_len(&self) -> usize {
        self.inner.queue.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{sleep, timeout};

    const TEST_WINDOW: Duration = Duration::from_millis(150);

    /// Base64 WAV chunk at the telephony rate whose samples all decode to a
    /// recognizable μ-law byte count.
    fn chunk_with_samples(count: usize) -> String {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"RIFF");
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(b"WAVE");
        buf.extend_from_slice(b"fmt ");
        buf.extend_from_slice(&16u32.to_le_bytes());
        buf.extend_from_slice(&1u16.to_le_bytes());
        buf.extend_from_slice(&1u16.to_le_bytes());
        buf.extend_from_slice(&8000u32.to_le_bytes());
        buf.extend_from_slice(&16000u32.to_le_bytes());
        buf.extend_from_slice(&2u16.to_le_bytes());
        buf.extend_from_slice(&16u16.to_le_bytes());
        buf.extend_from_slice(b"data");
        buf.extend_from_slice(&((count * 2) as u32).to_le_bytes());
        buf.extend_from_slice(&vec![0u8; count * 2]);
        BASE64.encode(&buf)
    }

    async fn recv_media_len(rx: &mut mpsc::Receiver<TelephonyOutbound>) -> usize {
        match timeout(Duration::from_secs(1), rx.recv()).await {
            Ok(Some(TelephonyOutbound::Media { payload })) => {
                BASE64.decode(payload).unwrap().len()
            }
            other => panic!("expected media frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_chunks_are_delivered_in_enqueue_order() {
        let (tx, mut rx) = mpsc::channel(16);
        let sequencer = OutboundSequencer::new(tx, 8000, TEST_WINDOW);

        // Distinct sizes so order is observable; B is larger (slower to
        // transcode) than C, which must not let C overtake it.
        sequencer.enqueue(chunk_with_samples(160));
        sequencer.enqueue(chunk_with_samples(4800));
        sequencer.enqueue(chunk_with_samples(80));

        // The first media frame of a session is preceded by one flush.
        match timeout(Duration::from_secs(1), rx.recv()).await {
            Ok(Some(TelephonyOutbound::Clear)) => {}
            other => panic!("expected leading clear, got {other:?}"),
        }
        assert_eq!(recv_media_len(&mut rx).await, 160);
        assert_eq!(recv_media_len(&mut rx).await, 4800);
        assert_eq!(recv_media_len(&mut rx).await, 80);
    }

    #[tokio::test]
    async fn test_rapid_enqueue_delivers_each_chunk_exactly_once() {
        let (tx, mut rx) = mpsc::channel(64);
        let sequencer = OutboundSequencer::new(tx, 8000, TEST_WINDOW);

        for i in 0..20 {
            sequencer.enqueue(chunk_with_samples(8 + i));
        }

        match timeout(Duration::from_secs(1), rx.recv()).await {
            Ok(Some(TelephonyOutbound::Clear)) => {}
            other => panic!("expected leading clear, got {other:?}"),
        }
        for i in 0..20 {
            assert_eq!(recv_media_len(&mut rx).await, 8 + i);
        }
        assert_eq!(sequencer.queue_len(), 0);
    }

    #[tokio::test]
    async fn test_untranscodable_chunks_are_dropped_not_forwarded() {
        let (tx, mut rx) = mpsc::channel(16);
        let sequencer = OutboundSequencer::new(tx, 8000, TEST_WINDOW);

        sequencer.enqueue(BASE64.encode(b"definitely not a wav container"));
        sequencer.enqueue(chunk_with_samples(16));

        match timeout(Duration::from_secs(1), rx.recv()).await {
            Ok(Some(TelephonyOutbound::Clear)) => {}
            other => panic!("expected leading clear, got {other:?}"),
        }
        assert_eq!(recv_media_len(&mut rx).await, 16);
        assert_eq!(sequencer.dropped_chunks(), 1);
    }

    #[tokio::test]
    async fn test_interruption_purges_queue_and_signals_provider() {
        let (tx, mut rx) = mpsc::channel(16);
        let sequencer = OutboundSequencer::new(tx, 8000, TEST_WINDOW);

        // Play one chunk so the session flush is already spent.
        sequencer.enqueue(chunk_with_samples(16));
        match timeout(Duration::from_secs(1), rx.recv()).await {
            Ok(Some(TelephonyOutbound::Clear)) => {}
            other => panic!("expected leading clear, got {other:?}"),
        }
        assert_eq!(recv_media_len(&mut rx).await, 16);

        sequencer.clear_and_halt();
        assert_eq!(sequencer.queue_len(), 0);

        match timeout(Duration::from_secs(1), rx.recv()).await {
            Ok(Some(TelephonyOutbound::Clear)) => {}
            other => panic!("expected clear after interruption, got {other:?}"),
        }
        match timeout(Duration::from_secs(1), rx.recv()).await {
            Ok(Some(TelephonyOutbound::Mark { name })) => {
                assert!(name.starts_with("barge-in-"));
            }
            other => panic!("expected mark after clear, got {other:?}"),
        }

        // A chunk arriving inside the window is discarded for good.
        sequencer.enqueue(chunk_with_samples(32));
        assert_eq!(sequencer.queue_len(), 0);

        // After the window closes, fresh audio plays again.
        sleep(TEST_WINDOW + Duration::from_millis(100)).await;
        sequencer.enqueue(chunk_with_samples(48));
        assert_eq!(recv_media_len(&mut rx).await, 48);
    }
}
