//! Error taxonomy shared across the supervision loop.
//!
//! Mirrors `srs-client`'s `SrsClientError`: a small `derive_more`-based enum
//! per component boundary, with `anyhow::Error` used at the seams that cross
//! component ownership (driver ↔ supervisor, store ↔ supervisor).

use derive_more::{Display, Error, From};

/// Failure of a [`crate::record::StreamRecord`] state transition.
///
/// Raised whenever the requested `from -> to` pair is not listed among the
/// transitions allowed by the record's state machine; the record itself is
/// left unchanged.
#[derive(Clone, Copy, Debug, Display, Error, PartialEq, Eq)]
#[display(fmt = "cannot transition stream record from {from:?} to {to:?}")]
pub struct InvalidTransition {
    /// State the record was in when the transition was attempted.
    pub from: crate::record::StreamState,
    /// State the transition attempted to move to.
    pub to: crate::record::StreamState,
}

/// Errors surfaced by the [`crate::driver`] while starting a transcoder.
#[derive(Debug, Display, Error, From)]
pub enum StartupError {
    /// The child did not report readiness within the startup deadline.
    #[display(fmt = "transcoder did not start within the startup deadline")]
    StartupTimeout,

    /// stderr emitted a recognized fatal marker before readiness.
    #[display(fmt = "transcoder reported a startup error: {_0}")]
    StartupFailure(#[error(not(source))] String),

    /// An overlay image required by the argument contract does not exist.
    #[display(fmt = "missing overlay asset: {}", "_0.display()")]
    MissingAsset(#[error(not(source))] std::path::PathBuf),

    /// Spawning the child process itself failed (binary missing, etc).
    #[display(fmt = "failed to spawn transcoder: {_0}")]
    Spawn(std::io::Error),
}

/// Errors surfaced by the [`crate::control_plane`] client.
#[derive(Debug, Display, Error, From)]
pub enum TransportError {
    /// The SSE connection or an HTTP notification failed transiently;
    /// caller should consult the retry policy before treating this as
    /// permanent.
    #[display(fmt = "transport request failed: {_0}")]
    Request(reqwest::Error),

    /// An SSE payload did not parse as JSON, or was missing required
    /// fields for its apparent event kind.
    #[display(fmt = "malformed event payload: {_0}")]
    MalformedEvent(#[error(not(source))] String),

    /// Reconnection attempts were exhausted; the subscription is now
    /// permanently down until a manual `reconnect()`.
    #[display(fmt = "exhausted {attempts} reconnect attempts")]
    ReconnectsExhausted {
        /// Number of attempts made before giving up.
        attempts: u32,
    },

    /// The control plane responded with a non-2xx status where 2xx was
    /// required.
    #[display(fmt = "unexpected HTTP status: {_0}")]
    Http(#[error(not(source))] reqwest::StatusCode),
}

/// Anomalies detected against the precondition table of §4.4, each of
/// which the supervisor corrects before continuing with the original
/// intent.
#[derive(Clone, Copy, Debug, Display, Error, PartialEq, Eq)]
pub enum PreconditionAnomaly {
    /// A record is `RUNNING` but carries no `processId`.
    #[display(fmt = "stream is RUNNING without a process id")]
    StreamRunningWithoutPid,

    /// A record is `RUNNING` but its `processId` is not a live process.
    #[display(fmt = "stream's recorded process is no longer alive")]
    DeadProcessDetected,

    /// A running stream's `streamKey` does not match the requested one.
    #[display(fmt = "running stream key does not match requested key")]
    InvalidStreamKey,

    /// More than one record is `RUNNING` for the same court.
    #[display(fmt = "more than one stream is RUNNING for this court")]
    MultipleStreamsRunning,
}

/// Fatal errors: configuration is invalid, or another instance already
/// holds the single-instance lock. The process exits 1 without attempting
/// recovery.
#[derive(Debug, Display, Error)]
pub enum Fatal {
    /// A required configuration key was absent or invalid.
    #[display(fmt = "invalid configuration: {_0}")]
    Config(#[error(not(source))] String),

    /// Another instance of this agent already holds the lock file.
    #[display(fmt = "another instance is already running (lock held)")]
    AlreadyRunning,
}
