//! Session protocol driver.
//!
//! One [`Session`] per call. It owns both halves of the bidirectional stream:
//! the send half stays with the session (fed by `send_audio` and `stop`), the
//! receive half moves into a spawned draining task that turns `audioOutput`
//! events into sink invocations. The service has no synchronization primitive
//! beyond message order, so the handshake and shutdown sequences are strictly
//! ordered with a settle pause after each step.
//!
//! Lifecycle: created -> handshaking -> active -> draining-shutdown -> closed.
//! The active flag flips on only after the full handshake succeeds and flips
//! off exactly once, on `stop()`, a fatal send error, or the draining task
//! exiting. The session's done-token is cancelled on every path that
//! deactivates it, which is what wakes the call loop.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex as StdMutex;
use std::sync::Arc;
use std::time::Duration;

use base64::prelude::{Engine as _, BASE64_STANDARD};
use bytes::Bytes;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::core::inference::{EventSink, EventSource, StreamConnector, StreamError};
use crate::core::session::events::{ClientEvent, InferenceConfiguration, ServerEvent};
use crate::errors::{BridgeError, BridgeResult};

/// Callback receiving decoded outbound audio chunks.
pub type AudioSink =
    Arc<dyn Fn(Bytes) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Pause after opening the stream, before the first handshake step.
const STREAM_SETTLE: Duration = Duration::from_millis(100);
/// Standard settle pause between handshake steps.
const STEP_SETTLE: Duration = Duration::from_millis(100);
/// Shorter settle for the text sub-content steps and the shutdown sequence.
const SHORT_SETTLE: Duration = Duration::from_millis(50);
/// How long `stop()` waits for the draining task before aborting it.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Per-session inference settings, derived from server configuration.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub voice_id: String,
    pub system_prompt: String,
    pub inference: InferenceConfiguration,
}

/// State and stream resources for one call's conversation with the service.
pub struct Session {
    prompt_name: String,
    content_name: String,
    audio_content_name: String,
    settings: SessionSettings,
    active: Arc<AtomicBool>,
    chunks_sent: Arc<AtomicU64>,
    sink: Arc<Mutex<Option<Box<dyn EventSink>>>>,
    fault: Arc<StdMutex<Option<BridgeError>>>,
    drain_handle: Option<JoinHandle<()>>,
    done: CancellationToken,
}

impl Session {
    /// Identifiers are freshly generated here and never change for the
    /// session's lifetime.
    pub fn new(settings: SessionSettings) -> Self {
        Self {
            prompt_name: Uuid::new_v4().to_string(),
            content_name: Uuid::new_v4().to_string(),
            audio_content_name: Uuid::new_v4().to_string(),
            settings,
            active: Arc::new(AtomicBool::new(false)),
            chunks_sent: Arc::new(AtomicU64::new(0)),
            sink: Arc::new(Mutex::new(None)),
            fault: Arc::new(StdMutex::new(None)),
            drain_handle: None,
            done: CancellationToken::new(),
        }
    }

    pub fn prompt_name(&self) -> &str {
        &self.prompt_name
    }

    pub fn audio_content_name(&self) -> &str {
        &self.audio_content_name
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Cancelled once the session is finished, whichever side ends it first.
    /// The call loop selects on this instead of polling the active flag.
    pub fn done(&self) -> CancellationToken {
        self.done.clone()
    }

    /// The fatal stream fault recorded by the draining task, if the session
    /// ended on one. Taking it clears the slot.
    pub fn take_fault(&self) -> Option<BridgeError> {
        self.fault.lock().ok().and_then(|mut slot| slot.take())
    }

    /// Open the stream, spawn the draining task bound to `audio_sink`, then
    /// run the six handshake steps in order. On success the session is active
    /// and ready for audio; on any failure it never becomes active and the
    /// error is fatal to the call.
    pub async fn start(
        &mut self,
        connector: &dyn StreamConnector,
        audio_sink: AudioSink,
    ) -> BridgeResult<()> {
        debug!(prompt_name = %self.prompt_name, "opening bidirectional stream");
        let (sink, source) = connector
            .connect()
            .await
            .map_err(BridgeError::Handshake)?;
        *self.sink.lock().await = Some(sink);

        self.drain_handle = Some(self.spawn_drain_task(source, audio_sink));
        tokio::time::sleep(STREAM_SETTLE).await;

        for (event, settle) in self.handshake_steps() {
            let kind = event.kind();
            if let Err(e) = self.send_event(event).await {
                error!(step = kind, "handshake step failed: {e}");
                self.deactivate();
                return Err(BridgeError::Handshake(e));
            }
            debug!(step = kind, "handshake step sent");
            if !settle.is_zero() {
                tokio::time::sleep(settle).await;
            }
        }

        self.active.store(true, Ordering::Release);
        info!(prompt_name = %self.prompt_name, "session active, ready for audio");
        Ok(())
    }

    /// Forward one chunk of caller audio. No-op unless the session is active.
    /// A send failure deactivates the session before returning; callers must
    /// treat it as session termination, not a retryable per-chunk error.
    pub async fn send_audio(&self, pcm: Bytes) -> BridgeResult<()> {
        if !self.is_active() {
            return Ok(());
        }

        let event = ClientEvent::audio_input(
            &self.prompt_name,
            &self.audio_content_name,
            BASE64_STANDARD.encode(&pcm),
        );
        if let Err(e) = self.send_event(event).await {
            self.deactivate();
            return Err(BridgeError::Send(e));
        }

        // Observability only; nothing in the protocol depends on this count.
        self.chunks_sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Ordered best-effort shutdown. Idempotent: only the call that flips the
    /// active flag off emits the shutdown sequence; every call reaps the
    /// draining task. Never returns an error.
    pub async fn stop(&mut self) {
        if self.active.swap(false, Ordering::AcqRel) {
            let shutdown = [
                (
                    ClientEvent::content_end(&self.prompt_name, &self.audio_content_name),
                    SHORT_SETTLE,
                ),
                (ClientEvent::prompt_end(&self.prompt_name), SHORT_SETTLE),
                (ClientEvent::session_end(), Duration::ZERO),
            ];
            for (event, settle) in shutdown {
                let kind = event.kind();
                if let Err(e) = self.send_event(event).await {
                    warn!(step = kind, "shutdown step failed, abandoning sequence: {e}");
                    break;
                }
                if !settle.is_zero() {
                    tokio::time::sleep(settle).await;
                }
            }

            if let Some(mut sink) = self.sink.lock().await.take() {
                if let Err(e) = sink.close().await {
                    warn!("failed to close input stream: {e}");
                }
            }

            info!(
                prompt_name = %self.prompt_name,
                chunks_sent = self.chunks_sent.load(Ordering::Relaxed),
                "session closed"
            );
        }

        self.done.cancel();
        if let Some(mut handle) = self.drain_handle.take() {
            if tokio::time::timeout(DRAIN_GRACE, &mut handle).await.is_err() {
                warn!("draining task did not stop within grace period, aborting");
                handle.abort();
            }
        }
    }

    fn handshake_steps(&self) -> [(ClientEvent, Duration); 6] {
        [
            (
                ClientEvent::session_start(self.settings.inference),
                STEP_SETTLE,
            ),
            (
                ClientEvent::prompt_start(&self.prompt_name, &self.settings.voice_id),
                STEP_SETTLE,
            ),
            (
                ClientEvent::system_text_start(&self.prompt_name, &self.content_name),
                SHORT_SETTLE,
            ),
            (
                ClientEvent::text_input(
                    &self.prompt_name,
                    &self.content_name,
                    &self.settings.system_prompt,
                ),
                SHORT_SETTLE,
            ),
            (
                ClientEvent::content_end(&self.prompt_name, &self.content_name),
                STEP_SETTLE,
            ),
            (
                ClientEvent::audio_start(&self.prompt_name, &self.audio_content_name),
                Duration::ZERO,
            ),
        ]
    }

    async fn send_event(&self, event: ClientEvent) -> Result<(), StreamError> {
        let mut guard = self.sink.lock().await;
        match guard.as_mut() {
            Some(sink) => sink.send(event).await,
            None => Err(StreamError::SendFailed("no open stream".to_string())),
        }
    }

    fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
        self.done.cancel();
    }

    fn spawn_drain_task(
        &self,
        mut source: Box<dyn EventSource>,
        audio_sink: AudioSink,
    ) -> JoinHandle<()> {
        let active = self.active.clone();
        let fault = self.fault.clone();
        let done = self.done.clone();

        tokio::spawn(async move {
            let mut role: Option<String> = None;

            loop {
                let received = tokio::select! {
                    _ = done.cancelled() => {
                        debug!("draining task cancelled");
                        break;
                    }
                    received = source.recv() => received,
                };

                match received {
                    Ok(Some(ServerEvent::AudioOutput { content })) => {
                        match BASE64_STANDARD.decode(content.as_bytes()) {
                            Ok(audio) if !audio.is_empty() => {
                                audio_sink(Bytes::from(audio)).await;
                            }
                            Ok(_) => {}
                            Err(e) => warn!("discarding audio chunk with invalid base64: {e}"),
                        }
                    }
                    Ok(Some(ServerEvent::TextOutput { content, role: text_role })) => {
                        if !content.is_empty() {
                            let attributed = text_role.or_else(|| role.clone());
                            info!(role = attributed.as_deref().unwrap_or(""), "{content}");
                        }
                    }
                    Ok(Some(ServerEvent::ContentStart { role: new_role })) => {
                        role = new_role;
                    }
                    Ok(Some(ServerEvent::ToolUse(request))) => {
                        info!("acknowledged tool invocation: {request}");
                    }
                    Ok(Some(event)) => {
                        debug!(kind = event.kind(), "ignoring inference event");
                    }
                    Ok(None) => {
                        info!("inference stream ended");
                        break;
                    }
                    Err(e) => {
                        error!("draining task receive failed: {e}");
                        if let Ok(mut slot) = fault.lock() {
                            *slot = Some(BridgeError::Receive(e));
                        }
                        break;
                    }
                }
            }

            active.store(false, Ordering::Release);
            done.cancel();
        })
    }
}
