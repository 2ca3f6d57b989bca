//! Control-plane SSE subscription, reconnect/backoff, dedup, and the
//! two outbound HTTP notifications (§4.3).

pub mod dedup;
pub mod sse;

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use courtstream_log::tracing;
use futures::StreamExt as _;
use rand::Rng as _;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use tokio::sync::{mpsc, Notify};
use url::Url;

use self::{dedup::Deduplicator, sse::SseDecoder};
use crate::{
    error::TransportError,
    record::{CourtId, InboundEvent, StreamKey},
};

const GO_LIVE_MAX_ATTEMPTS: u32 = 5;
const GO_LIVE_BASE_DELAY: Duration = Duration::from_secs(1);

/// Configuration the client needs, kept narrow and independent of
/// [`crate::config::Config`] so it is trivially constructible in tests.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Control-plane HTTP base.
    pub base_url: Url,
    /// Identity of this agent.
    pub ground_id: String,
    /// Base delay of the SSE reconnect backoff.
    pub retry_interval: Duration,
    /// Cap on reconnect attempts before permanent failure.
    pub max_retries: u32,
}

/// Maintains the single long-lived SSE subscription plus the two
/// request/response calls to the control plane.
#[derive(Debug)]
pub struct ControlPlaneClient {
    http: reqwest::Client,
    config: ClientConfig,
    connected: Arc<AtomicBool>,
    reconnect: Arc<Notify>,
}

impl ControlPlaneClient {
    /// Builds a client against `config`, performing no network I/O yet.
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            connected: Arc::new(AtomicBool::new(false)),
            reconnect: Arc::new(Notify::new()),
        }
    }

    /// Whether the SSE subscription currently believes itself connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Resets the reconnect attempt counter and forces an immediate
    /// rebind, per §4.3's "a manual `reconnect()` resets the attempt
    /// counter and rebinds".
    pub fn reconnect(&self) {
        self.reconnect.notify_one();
    }

    /// Runs the SSE loop until reconnect attempts are exhausted,
    /// forwarding every non-duplicate, well-formed event to `events_out`
    /// in arrival order.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ReconnectsExhausted`] once `max_retries`
    /// consecutive reconnect attempts have failed.
    pub async fn run(
        &self,
        events_out: mpsc::Sender<InboundEvent>,
    ) -> Result<(), TransportError> {
        let mut dedup = Deduplicator::new();
        let mut attempt: u32 = 0;

        loop {
            match self.subscribe_once(&events_out, &mut dedup).await {
                Ok(()) => {
                    tracing::warn!("SSE body closed, reconnecting");
                }
                Err(e) => {
                    tracing::warn!("SSE subscription failed: {e}");
                }
            }
            self.connected.store(false, Ordering::Relaxed);

            attempt += 1;
            if attempt > self.config.max_retries {
                return Err(TransportError::ReconnectsExhausted {
                    attempts: attempt - 1,
                });
            }

            let delay = backoff_delay(self.config.retry_interval, attempt);
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = self.reconnect.notified() => {
                    attempt = 0;
                }
            }
        }
    }

    async fn subscribe_once(
        &self,
        events_out: &mpsc::Sender<InboundEvent>,
        dedup: &mut Deduplicator,
    ) -> Result<(), TransportError> {
        let url = self.config.base_url.join(&format!(
            "api/v1/padel-grounds/{}/events",
            self.config.ground_id,
        )).map_err(|e| {
            TransportError::MalformedEvent(format!("bad events URL: {e}"))
        })?;

        let resp = self
            .http
            .get(url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(TransportError::Http(resp.status()));
        }

        self.connected.store(true, Ordering::Relaxed);
        tracing::info!("SSE subscription established");

        let mut decoder = SseDecoder::new();
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            for frame in decoder.feed(&chunk) {
                self.handle_frame(&frame.data, events_out, dedup).await;
            }
        }
        Ok(())
    }

    async fn handle_frame(
        &self,
        payload: &str,
        events_out: &mpsc::Sender<InboundEvent>,
        dedup: &mut Deduplicator,
    ) {
        let event = match serde_json::from_str::<InboundEvent>(payload) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!("dropping malformed event: {e} ({payload})");
                return;
            }
        };

        if matches!(event, InboundEvent::Unknown) {
            tracing::warn!("dropping event with unrecognized action");
            return;
        }

        let fingerprint = event.fingerprint();
        if dedup.is_duplicate(&fingerprint) {
            tracing::info!("dropping duplicate event: {fingerprint}");
            return;
        }

        if events_out.send(event).await.is_err() {
            tracing::warn!("event receiver dropped, discarding event");
        }
    }

    /// Notifies the control plane that a court has gone live.
    ///
    /// Retries on 5xx with exponential backoff (base 1 s, factor 2, ±50%
    /// jitter, up to 5 attempts). A 4xx response is returned immediately,
    /// not retried.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if every attempt fails, or immediately
    /// on a 4xx response.
    pub async fn go_live_youtube(
        &self,
        court_id: &CourtId,
        stream_key: &StreamKey,
    ) -> Result<(), TransportError> {
        let url = self.config.base_url.join(&format!(
            "api/v1/padel-grounds/{}/courts/{}/go-live/{}",
            self.config.ground_id, court_id.0, stream_key.0,
        )).map_err(|e| {
            TransportError::MalformedEvent(format!("bad go-live URL: {e}"))
        })?;

        for attempt in 1..=GO_LIVE_MAX_ATTEMPTS {
            let resp = self.http.get(url.clone()).send().await?;
            let status = resp.status();

            if status.is_success() {
                return Ok(());
            }
            if status.is_client_error() {
                return Err(TransportError::Http(status));
            }

            tracing::warn!(
                "go-live notification failed with {status}, attempt \
                 {attempt}/{GO_LIVE_MAX_ATTEMPTS}",
            );
            if attempt == GO_LIVE_MAX_ATTEMPTS {
                return Err(TransportError::Http(status));
            }
            tokio::time::sleep(jittered_delay(GO_LIVE_BASE_DELAY, attempt))
                .await;
        }
        unreachable!("loop always returns by the final attempt")
    }

    /// Sends a single heartbeat; caller owns the cadence.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] on any non-2xx response or transport
    /// failure.
    pub async fn send_heartbeat(&self) -> Result<(), TransportError> {
        let url = self
            .config
            .base_url
            .join("api/v1/padel-grounds/heartbeat")
            .map_err(|e| {
                TransportError::MalformedEvent(format!(
                    "bad heartbeat URL: {e}"
                ))
            })?;

        let resp = self
            .http
            .post(url)
            .json(&serde_json::json!({ "groundId": self.config.ground_id }))
            .send()
            .await?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(TransportError::Http(resp.status()))
        }
    }
}

/// `min(retryInterval * 2^(attempt-1), 30_000)` ms, per §8 boundary
/// behavior.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let millis =
        u64::try_from(base.as_millis()).unwrap_or(u64::MAX)
            .saturating_mul(1u64 << (attempt - 1).min(32));
    Duration::from_millis(millis.min(30_000))
}

/// Exponential delay with ±50% jitter for the go-live retry policy.
fn jittered_delay(base: Duration, attempt: u32) -> Duration {
    let millis =
        u64::try_from(base.as_millis()).unwrap_or(u64::MAX)
            .saturating_mul(1u64 << (attempt - 1).min(32));
    let jitter_factor = rand::thread_rng().gen_range(0.5..1.5);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Duration::from_millis((millis as f64 * jitter_factor) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_caps_at_30s() {
        assert_eq!(
            backoff_delay(Duration::from_millis(1000), 1),
            Duration::from_millis(1000),
        );
        assert_eq!(
            backoff_delay(Duration::from_millis(1000), 6),
            Duration::from_millis(30_000),
        );
        assert_eq!(
            backoff_delay(Duration::from_millis(1000), 20),
            Duration::from_millis(30_000),
        );
    }

    #[test]
    fn backoff_doubles_each_attempt_until_cap() {
        assert_eq!(
            backoff_delay(Duration::from_millis(1000), 3),
            Duration::from_millis(4000),
        );
    }
}
