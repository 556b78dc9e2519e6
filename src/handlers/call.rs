//! Call bridge loop.
//!
//! Owns the WebSocket connection for one phone call. Inbound binary frames
//! are raw PCM from the telephony provider and go verbatim to the session;
//! outbound audio produced by the draining task comes back through an mpsc
//! channel and a dedicated sender task, so the drain never blocks on a slow
//! caller socket. The loop selects between the socket and the session's
//! done-token and finishes every exit path through a single `stop()`.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::select;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::core::session::{AudioSink, Session};
use crate::state::AppState;

/// Buffer for outbound audio chunks awaiting the caller socket.
const AUDIO_CHANNEL_BUFFER_SIZE: usize = 256;

/// How long teardown waits for the sender task to flush buffered audio.
const SENDER_FLUSH_GRACE: Duration = Duration::from_secs(2);

/// WebSocket endpoint the telephony provider connects its call audio to.
pub async fn call_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    info!("call audio connection upgrade requested");
    ws.on_upgrade(move |socket| handle_call_socket(socket, state))
}

async fn handle_call_socket(socket: WebSocket, state: Arc<AppState>) {
    info!("call audio connection established");

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (audio_tx, mut audio_rx) = mpsc::channel::<Bytes>(AUDIO_CHANNEL_BUFFER_SIZE);

    // Sender task: forwards assistant audio to the caller. A failed forward
    // drops that chunk and is logged; the call itself goes on.
    let mut sender_task = tokio::spawn(async move {
        while let Some(chunk) = audio_rx.recv().await {
            if let Err(e) = ws_sender.send(Message::Binary(chunk)).await {
                warn!("failed to forward audio to caller: {e}");
            }
        }
    });

    let mut session = Session::new(state.config.session_settings());
    let done = session.done();

    let tx = audio_tx.clone();
    let sink: AudioSink = Arc::new(move |chunk: Bytes| {
        let tx = tx.clone();
        Box::pin(async move {
            if tx.send(chunk).await.is_err() {
                debug!("caller audio channel closed, dropping chunk");
            }
        })
    });

    match session.start(state.connector.as_ref(), sink).await {
        Ok(()) => {
            bridge_audio(&mut ws_receiver, &session, &done).await;
        }
        Err(e) => {
            error!("failed to start inference session: {e}");
        }
    }

    // Single teardown path for every way out of the loop.
    session.stop().await;
    if let Some(fault) = session.take_fault() {
        error!("session ended on stream fault: {fault}");
    }

    // Dropping the last sender lets the sender task drain what is still
    // buffered, then exit on its own.
    drop(audio_tx);
    if tokio::time::timeout(SENDER_FLUSH_GRACE, &mut sender_task)
        .await
        .is_err()
    {
        warn!("sender task did not flush within grace period, aborting");
        sender_task.abort();
    }
    info!("call terminated");
}

/// Pump inbound frames into the session until the caller hangs up or the
/// session signals it is done.
async fn bridge_audio(
    ws_receiver: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
    session: &Session,
    done: &tokio_util::sync::CancellationToken,
) {
    // The provider opens the stream with a non-binary banner message.
    let mut first_message = true;

    loop {
        select! {
            _ = done.cancelled() => {
                info!("session finished, closing call");
                break;
            }
            received = ws_receiver.next() => match received {
                Some(Ok(Message::Binary(pcm))) => {
                    if let Err(e) = session.send_audio(pcm).await {
                        error!("session terminated while sending audio: {e}");
                        break;
                    }
                }
                Some(Ok(Message::Text(text))) => {
                    if first_message {
                        first_message = false;
                        debug!("discarding transport banner: {text}");
                    }
                    // Later text frames carry nothing the bridge acts on.
                }
                Some(Ok(Message::Close(_))) => {
                    info!("caller disconnected");
                    break;
                }
                Some(Ok(_)) => {
                    // Ping/pong handled by the transport layer.
                }
                Some(Err(e)) => {
                    warn!("call socket error: {e}");
                    break;
                }
                None => {
                    info!("call socket closed");
                    break;
                }
            }
        }
    }
}
