//! The durable per-stream record and the events that mutate it.

use chrono::{DateTime, Utc};
use derive_more::Display;
use rand::Rng as _;
use serde::{Deserialize, Serialize};

use crate::error::InvalidTransition;

/// Opaque, sortable, URL-safe identifier of a [`StreamRecord`].
///
/// Built from a millisecond timestamp followed by a short random suffix,
/// rather than a `Uuid`: ids generated this way sort chronologically by
/// creation order, which is convenient for directory listings and logs,
/// while remaining as unguessable as the random suffix allows.
#[derive(
    Clone, Debug, Display, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct StreamId(String);

impl StreamId {
    const SUFFIX_ALPHABET: &'static [u8] =
        b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    const SUFFIX_LEN: usize = 8;

    /// Generates a new [`StreamId`] from the given creation timestamp.
    #[must_use]
    pub fn generate(now: DateTime<Utc>) -> Self {
        let mut rng = rand::thread_rng();
        let suffix: String = (0..Self::SUFFIX_LEN)
            .map(|_| {
                let idx = rng.gen_range(0..Self::SUFFIX_ALPHABET.len());
                Self::SUFFIX_ALPHABET[idx] as char
            })
            .collect();
        Self(format!("{}-{}", now.timestamp_millis(), suffix))
    }

    /// Returns the underlying string slice, e.g. for use as a filename
    /// stem.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for StreamId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_owned()))
    }
}

/// Logical grouping key: "one running stream per court" is enforced across
/// all records sharing a `CourtId`.
#[derive(
    Clone, Debug, Display, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct CourtId(pub String);

/// Opaque destination credential handed to the transcoder.
#[derive(Clone, Debug, Display, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamKey(pub String);

/// Lifecycle state of a [`StreamRecord`].
#[derive(
    Clone, Copy, Debug, Display, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamState {
    /// Record created, transcoder not yet confirmed running.
    Pending,
    /// Transcoder confirmed running; `processId` is set.
    Running,
    /// Stopped on request; `expectedExit` was set before the child exited.
    Stopped,
    /// Crashed, stalled, or failed to start.
    Failed,
    /// Startup recovery is re-evaluating this record against live
    /// processes.
    Reconciling,
}

impl StreamState {
    /// Whether transitioning from `self` to `to` is permitted by the
    /// table in §3 of the data model.
    #[must_use]
    pub fn can_transition_to(self, to: Self) -> bool {
        use StreamState::{Failed, Pending, Reconciling, Running, Stopped};
        matches!(
            (self, to),
            (Pending, Running | Failed)
                | (Running, Stopped | Failed | Reconciling)
                | (Stopped, Pending | Running)
                | (Failed, Pending | Running)
                | (Reconciling, Running | Failed | Stopped)
        )
    }
}

/// Durable record of one supervised stream.
///
/// Persisted one-per-file by [`crate::store::RecordStore`]; mutated only by
/// the supervisor (§4.4), which is responsible for calling
/// [`StreamRecord::transition_to`] rather than assigning `state` directly.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StreamRecord {
    /// Stable identifier, generated once at creation.
    pub id: StreamId,
    /// Input source URL (RTSP/HTTP/HTTPS).
    pub camera_url: String,
    /// Opaque destination credential handed to the transcoder.
    pub stream_key: StreamKey,
    /// Logical grouping key for the "one stream per court" invariant.
    pub court_id: CourtId,
    /// Current lifecycle state.
    pub state: StreamState,
    /// Whether an audio-probe step found at least one audio stream.
    #[serde(default, skip_serializing_if = "courtstream_serde::is_false")]
    pub has_audio: bool,
    /// OS process id of the current transcoder, if one is running.
    pub process_id: Option<u32>,
    /// Set by a `stop` handler immediately before asking the driver to
    /// terminate the process, cleared once the exit has been observed.
    /// Distinguishes a requested stop from a crash (§9 Design Notes).
    #[serde(default, skip_serializing_if = "courtstream_serde::is_false")]
    pub expected_exit: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Timestamp of the most recent mutation.
    pub updated_at: DateTime<Utc>,
}

impl StreamRecord {
    /// Creates a new record in [`StreamState::Pending`].
    #[must_use]
    pub fn new(
        camera_url: String,
        stream_key: StreamKey,
        court_id: CourtId,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: StreamId::generate(now),
            camera_url,
            stream_key,
            court_id,
            state: StreamState::Pending,
            has_audio: false,
            process_id: None,
            expected_exit: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Attempts to move this record to `to`, validating against the
    /// transition table. On success, updates `updated_at` to `now`.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] and leaves the record unchanged if the
    /// transition is not permitted.
    pub fn transition_to(
        &mut self,
        to: StreamState,
        now: DateTime<Utc>,
    ) -> Result<(), InvalidTransition> {
        if !self.state.can_transition_to(to) {
            return Err(InvalidTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        self.updated_at = now;
        Ok(())
    }

    /// Equality ignoring `updated_at`, matching the round-trip property in
    /// §8 ("`save(r); findById(r.id)` returns a record equal to `r` modulo
    /// `updatedAt`").
    #[must_use]
    pub fn eq_modulo_updated_at(&self, other: &Self) -> bool {
        self.id == other.id
            && self.camera_url == other.camera_url
            && self.stream_key == other.stream_key
            && self.court_id == other.court_id
            && self.state == other.state
            && self.has_audio == other.has_audio
            && self.process_id == other.process_id
            && self.expected_exit == other.expected_exit
            && self.created_at == other.created_at
    }
}

/// An event decoded from the control plane's SSE stream (§3 Inbound Event).
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum InboundEvent {
    /// Request to start (or re-key) a stream for a court.
    Start {
        /// Input source URL.
        #[serde(rename = "cameraUrl")]
        camera_url: String,
        /// Destination credential.
        #[serde(rename = "streamKey")]
        stream_key: StreamKey,
        /// Logical court grouping.
        #[serde(rename = "courtId")]
        court_id: CourtId,
    },
    /// Request to stop a stream for a court.
    Stop {
        /// Input source URL, matched against the running record.
        #[serde(rename = "cameraUrl")]
        camera_url: String,
        /// Destination credential, matched against the running record.
        #[serde(rename = "streamKey")]
        stream_key: StreamKey,
        /// Logical court grouping.
        #[serde(rename = "courtId")]
        court_id: CourtId,
    },
    /// Out-of-core-scope notification, routed to a thin collaborator.
    #[serde(rename = "version-update")]
    VersionUpdate {
        /// Opaque version identifier.
        version: String,
    },
    /// Any action this agent does not recognize. Logged and dropped.
    #[serde(other)]
    Unknown,
}

impl InboundEvent {
    /// Computes the deduplication fingerprint described in §9 Design
    /// Notes: `{action, courtId, streamKey, cameraUrl}`, stronger than the
    /// source's `{eventType, streamId, coarseTimestamp}` because it does
    /// not depend on a coarse time bucket that can alias two distinct
    /// legitimate events.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        match self {
            Self::Start {
                camera_url,
                stream_key,
                court_id,
            } => format!("start|{}|{}|{}", court_id.0, stream_key.0, camera_url),
            Self::Stop {
                camera_url,
                stream_key,
                court_id,
            } => format!("stop|{}|{}|{}", court_id.0, stream_key.0, camera_url),
            Self::VersionUpdate { version } => {
                format!("version-update|{version}")
            }
            Self::Unknown => "unknown".to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_table_matches_spec() {
        use StreamState::{Failed, Pending, Reconciling, Running, Stopped};

        assert!(Pending.can_transition_to(Running));
        assert!(Pending.can_transition_to(Failed));
        assert!(!Pending.can_transition_to(Stopped));
        assert!(!Pending.can_transition_to(Reconciling));

        assert!(Running.can_transition_to(Stopped));
        assert!(Running.can_transition_to(Failed));
        assert!(Running.can_transition_to(Reconciling));
        assert!(!Running.can_transition_to(Pending));

        assert!(Stopped.can_transition_to(Pending));
        assert!(Stopped.can_transition_to(Running));
        assert!(!Stopped.can_transition_to(Failed));

        assert!(Failed.can_transition_to(Pending));
        assert!(Failed.can_transition_to(Running));
        assert!(!Failed.can_transition_to(Stopped));

        assert!(Reconciling.can_transition_to(Running));
        assert!(Reconciling.can_transition_to(Failed));
        assert!(Reconciling.can_transition_to(Stopped));
        assert!(!Reconciling.can_transition_to(Pending));
    }

    #[test]
    fn invalid_transition_leaves_record_unchanged() {
        let now = Utc::now();
        let mut record = StreamRecord::new(
            "rtsp://cam/1".into(),
            StreamKey("key".into()),
            CourtId("C1".into()),
            now,
        );
        let err = record
            .transition_to(StreamState::Stopped, now)
            .unwrap_err();
        assert_eq!(err.from, StreamState::Pending);
        assert_eq!(err.to, StreamState::Stopped);
        assert_eq!(record.state, StreamState::Pending);
    }

    #[test]
    fn fingerprint_distinguishes_distinct_events_same_bucket() {
        let a = InboundEvent::Start {
            camera_url: "rtsp://cam/1".into(),
            stream_key: StreamKey("K1".into()),
            court_id: CourtId("C1".into()),
        };
        let b = InboundEvent::Start {
            camera_url: "rtsp://cam/1".into(),
            stream_key: StreamKey("K2".into()),
            court_id: CourtId("C1".into()),
        };
        assert_ne!(a.fingerprint(), b.fingerprint());
    }
}
