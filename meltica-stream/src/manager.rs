//! Single-socket venue stream manager (component C7).

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use smol_str::SmolStr;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::error::StreamError;
use crate::frames::{chunk_control_frames, parse_control_response, ControlFrame, ControlMethod};
use crate::ratelimit::ControlRateLimiter;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

const DIAL_TIMEOUT: Duration = Duration::from_secs(10);
const BACKOFF_START: Duration = Duration::from_millis(500);
const BACKOFF_CAP: Duration = Duration::from_secs(30);
const PING_INTERVAL: Duration = Duration::from_secs(30);
const PING_TIMEOUT: Duration = Duration::from_secs(5);
const CONTROL_MIN_INTERVAL: Duration = Duration::from_millis(250);

/// Receives every text frame that did not parse as a control response, i.e. the actual
/// market-data payloads.
pub trait MessageHandler: Send + Sync + 'static {
    fn handle(&self, text: String);
}

impl<F: Fn(String) + Send + Sync + 'static> MessageHandler for F {
    fn handle(&self, text: String) {
        (self)(text)
    }
}

struct Shared {
    base_url: Url,
    label: SmolStr,
    handler: Arc<dyn MessageHandler>,
    error_tx: mpsc::UnboundedSender<StreamError>,
    active_streams: Mutex<BTreeSet<String>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    rate_limiter: ControlRateLimiter,
    next_request_id: AtomicU64,
    pending_requests: Mutex<BTreeSet<u64>>,
    last_rtt_ms: AtomicU64,
    cancel: CancellationToken,
}

/// Maintains a single WebSocket session with live subscription changes: dials with
/// exponential backoff, resubscribes the active stream set on every reconnect, paces control
/// frames through one rate limiter, and runs a read loop plus a ping loop per session.
#[derive(Clone)]
pub struct VenueStreamManager {
    shared: Arc<Shared>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl std::fmt::Debug for VenueStreamManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VenueStreamManager").field("label", &self.shared.label).finish_non_exhaustive()
    }
}

impl VenueStreamManager {
    pub fn new(
        base_url: Url,
        label: impl Into<SmolStr>,
        handler: Arc<dyn MessageHandler>,
        error_tx: mpsc::UnboundedSender<StreamError>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                base_url,
                label: label.into(),
                handler,
                error_tx,
                active_streams: Mutex::new(BTreeSet::new()),
                outbound: Mutex::new(None),
                rate_limiter: ControlRateLimiter::new(CONTROL_MIN_INTERVAL),
                next_request_id: AtomicU64::new(1),
                pending_requests: Mutex::new(BTreeSet::new()),
                last_rtt_ms: AtomicU64::new(0),
                cancel: CancellationToken::new(),
            }),
            task: Arc::new(Mutex::new(None)),
        }
    }

    /// Round-trip time of the most recently acknowledged ping, if one has completed yet.
    pub fn last_rtt_ms(&self) -> Option<u64> {
        match self.shared.last_rtt_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Some(ms),
        }
    }

    /// Dials once (blocking up to 10s) and spawns the connection loop in the background.
    pub async fn start(&self) -> Result<(), StreamError> {
        let stream = dial(&self.shared.base_url).await?;
        let shared = self.shared.clone();
        let handle = tokio::spawn(async move { run(shared, stream).await });
        *self.task.lock().await = Some(handle);
        Ok(())
    }

    /// Cancels the manager and closes the connection.
    pub async fn stop(&self) {
        self.shared.cancel.cancel();
        if let Some(handle) = self.task.lock().await.take() {
            let _ = handle.await;
        }
    }

    /// Merges `streams` into the active set and sends chunked SUBSCRIBE frames for the ones
    /// that were not already active.
    pub async fn subscribe(&self, streams: Vec<String>) -> Result<(), StreamError> {
        let fresh: Vec<String> = {
            let mut active = self.shared.active_streams.lock().await;
            streams.into_iter().filter(|s| active.insert(s.clone())).collect()
        };
        if fresh.is_empty() {
            return Ok(());
        }
        send_control(&self.shared, ControlMethod::Subscribe, &fresh).await
    }

    /// Removes `streams` from the active set and sends chunked UNSUBSCRIBE frames for the ones
    /// that were actually active.
    pub async fn unsubscribe(&self, streams: Vec<String>) -> Result<(), StreamError> {
        let removed: Vec<String> = {
            let mut active = self.shared.active_streams.lock().await;
            streams.into_iter().filter(|s| active.remove(s)).collect()
        };
        if removed.is_empty() {
            return Ok(());
        }
        send_control(&self.shared, ControlMethod::Unsubscribe, &removed).await
    }
}

async fn send_control(shared: &Shared, method: ControlMethod, streams: &[String]) -> Result<(), StreamError> {
    let frames = chunk_control_frames(method, streams, || shared.next_request_id.fetch_add(1, Ordering::Relaxed));
    for frame in frames {
        shared.rate_limiter.wait_for_slot(&shared.cancel).await?;
        shared.pending_requests.lock().await.insert(frame.id);
        send_frame(shared, &frame).await?;
    }
    Ok(())
}

async fn send_frame(shared: &Shared, frame: &ControlFrame) -> Result<(), StreamError> {
    let text = serde_json::to_string(frame).expect("control frame always serialises");
    send_raw(shared, Message::Text(text.into())).await
}

/// Sends a pre-built frame on the live connection's outbound channel, dropping it silently if
/// there is no connection to send it on (the writer task is between sessions).
async fn send_raw(shared: &Shared, message: Message) -> Result<(), StreamError> {
    let outbound = shared.outbound.lock().await;
    let Some(tx) = outbound.as_ref() else {
        debug!(label = %shared.label, "dropped outbound frame, no live connection");
        return Ok(());
    };
    tx.send(message).map_err(|_| StreamError::AbnormalClose("outbound channel closed".to_string()))
}

async fn dial(base_url: &Url) -> Result<WsStream, StreamError> {
    let (stream, _response) = tokio::time::timeout(DIAL_TIMEOUT, connect_async(base_url.as_str()))
        .await
        .map_err(|_| StreamError::DialTimeout)??;
    Ok(stream)
}

/// Connection loop: run one session to completion (resubscribing the active set as its first
/// act), then reconnect with exponential backoff unless cancelled.
async fn run(shared: Arc<Shared>, mut stream: WsStream) {
    let mut backoff = BACKOFF_START;

    loop {
        match run_session(&shared, stream).await {
            Ok(()) => {}
            Err(err) => {
                warn!(label = %shared.label, %err, "session ended with error");
                let _ = shared.error_tx.send(err);
            }
        }

        if shared.cancel.is_cancelled() {
            return;
        }

        shared.rate_limiter.reset().await;
        *shared.outbound.lock().await = None;

        stream = loop {
            tokio::select! {
                _ = shared.cancel.cancelled() => return,
                _ = tokio::time::sleep(backoff) => {}
            }
            match dial(&shared.base_url).await {
                Ok(new_stream) => {
                    backoff = BACKOFF_START;
                    break new_stream;
                }
                Err(err) => {
                    warn!(label = %shared.label, %err, "reconnect attempt failed");
                    backoff = (backoff * 2).min(BACKOFF_CAP);
                }
            }
        };
    }
}

/// Runs one session to completion: resubscribes the active stream set, then a read loop
/// distinguishing control responses from data frames concurrently with a ping loop,
/// terminating on the first error or cancellation.
async fn run_session(shared: &Arc<Shared>, stream: WsStream) -> Result<(), StreamError> {
    let (mut sink, mut source) = stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    *shared.outbound.lock().await = Some(tx.clone());

    let writer_shared = shared.clone();
    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if let Err(err) = sink.send(message).await {
                warn!(label = %writer_shared.label, %err, "failed writing to socket");
                break;
            }
        }
    });

    resubscribe_active(shared).await?;

    let mut next_ping_at = tokio::time::Instant::now() + PING_INTERVAL;
    let mut pending_ping: Option<tokio::time::Instant> = None;
    let result = loop {
        let timeout_at = pending_ping.map(|sent_at| sent_at + PING_TIMEOUT);
        tokio::select! {
            _ = shared.cancel.cancelled() => break Ok(()),
            _ = tokio::time::sleep_until(next_ping_at), if pending_ping.is_none() => {
                if let Err(err) = shared.rate_limiter.wait_for_slot(&shared.cancel).await {
                    break Err(err);
                }
                if send_raw(shared, Message::Ping(Vec::new().into())).await.is_err() {
                    break Err(StreamError::AbnormalClose("outbound channel closed".to_string()));
                }
                pending_ping = Some(tokio::time::Instant::now());
            }
            _ = tokio::time::sleep_until(timeout_at.unwrap_or_else(tokio::time::Instant::now)), if pending_ping.is_some() => {
                break Err(StreamError::PingTimeout);
            }
            frame = source.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => handle_text(shared, text.as_str()).await,
                    Some(Ok(Message::Pong(_))) => {
                        match pending_ping.take() {
                            Some(sent_at) => {
                                let rtt_ms = tokio::time::Instant::now().duration_since(sent_at).as_millis() as u64;
                                shared.last_rtt_ms.store(rtt_ms, Ordering::Relaxed);
                                debug!(label = %shared.label, rtt_ms, "pong received");
                            }
                            None => debug!(label = %shared.label, "unsolicited pong received"),
                        }
                        next_ping_at = tokio::time::Instant::now() + PING_INTERVAL;
                    }
                    Some(Ok(Message::Binary(_))) => {}
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame.map(|f| f.reason.to_string()).unwrap_or_default();
                        if reason.is_empty() {
                            break Ok(());
                        }
                        break Err(StreamError::AbnormalClose(reason));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => break Err(StreamError::WebSocket(err)),
                    None => break Ok(()),
                }
            }
        }
    };

    drop(tx);
    let _ = tokio::time::timeout(PING_TIMEOUT, writer).await;
    result
}

/// Resends the full active stream set as chunked SUBSCRIBE frames, paced through the same rate
/// limiter as a live `subscribe` call. A no-op on the very first connect, when nothing is
/// active yet.
async fn resubscribe_active(shared: &Arc<Shared>) -> Result<(), StreamError> {
    let streams: Vec<String> = shared.active_streams.lock().await.iter().cloned().collect();
    if streams.is_empty() {
        return Ok(());
    }
    send_control(shared, ControlMethod::Subscribe, &streams).await
}

async fn handle_text(shared: &Arc<Shared>, text: &str) {
    if let Some(response) = parse_control_response(text) {
        let was_pending = shared.pending_requests.lock().await.remove(&response.id);
        if was_pending {
            if let Some(error) = response.error {
                let _ = shared.error_tx.send(StreamError::ControlRejected { id: response.id, message: error.msg });
            }
        }
        return;
    }
    shared.handler.handle(text.to_string());
}
