//! Supervisor Core: owns the record set and reacts to inbound events,
//! process exits, and the periodic health tick (§4.4).

mod decision;

use std::sync::Arc;

use chrono::Utc;
use courtstream_log::tracing;
use tokio::sync::{mpsc, watch};

use self::decision::StartDecision;
use crate::{
    config::Config,
    control_plane::ControlPlaneClient,
    driver::{ProcessExited, StartRequest, TranscoderDriver},
    error::PreconditionAnomaly,
    record::{CourtId, InboundEvent, StreamKey, StreamRecord, StreamState},
    recovery,
    store::RecordStore,
};

/// Owns the mutation of stream records in response to every input the
/// agent reacts to. One instance per process; its methods assume they are
/// only ever driven by [`Self::run`]'s single-threaded event loop, which is
/// what gives record mutations their serialization (§4.1 Guarantees, §5).
#[derive(Debug)]
pub struct Supervisor {
    config: Arc<Config>,
    store: RecordStore,
    driver: TranscoderDriver,
    control_plane: Arc<ControlPlaneClient>,
    exited_tx: mpsc::Sender<ProcessExited>,
}

impl Supervisor {
    /// Builds a new supervisor and the channel its spawned transcoders
    /// report exits on.
    #[must_use]
    pub fn new(
        config: Arc<Config>,
        store: RecordStore,
        driver: TranscoderDriver,
        control_plane: Arc<ControlPlaneClient>,
    ) -> (Self, mpsc::Receiver<ProcessExited>) {
        let (exited_tx, exited_rx) = mpsc::channel(32);
        (
            Self {
                config,
                store,
                driver,
                control_plane,
                exited_tx,
            },
            exited_rx,
        )
    }

    /// Runs the event loop until `shutdown` reports `true`.
    ///
    /// Drives, in one `select!`: inbound control-plane events, transcoder
    /// exit notifications, and the periodic health tick. Performs recovery
    /// once before entering the loop, and a full stream teardown once it
    /// exits.
    ///
    /// # Errors
    ///
    /// Returns an error if recovery fails to read the record store.
    pub async fn run(
        &self,
        mut inbound: mpsc::Receiver<InboundEvent>,
        mut exited: mpsc::Receiver<ProcessExited>,
        mut shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        recovery::recover(&self.store, &self.driver).await?;

        let mut health_tick =
            tokio::time::interval(self.config.health_check_interval);
        health_tick.set_missed_tick_behavior(
            tokio::time::MissedTickBehavior::Delay,
        );

        loop {
            tokio::select! {
                _ = health_tick.tick() => {
                    self.handle_tick().await;
                }
                event = inbound.recv() => {
                    match event {
                        Some(event) => self.handle_event(event).await,
                        None => {
                            tracing::warn!("inbound event channel closed");
                        }
                    }
                }
                exited = exited.recv() => {
                    if let Some(exited) = exited {
                        self.handle_process_exited(exited).await;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    async fn handle_event(&self, event: InboundEvent) {
        let outcome = match event {
            InboundEvent::Start {
                camera_url,
                stream_key,
                court_id,
            } => self.handle_start(camera_url, stream_key, court_id).await,
            InboundEvent::Stop {
                camera_url,
                stream_key,
                court_id,
            } => self.handle_stop(camera_url, stream_key, court_id).await,
            InboundEvent::VersionUpdate { version } => {
                tracing::info!(version, "received version-update event");
                Ok(())
            }
            InboundEvent::Unknown => Ok(()),
        };
        if let Err(e) = outcome {
            tracing::warn!("failed to handle inbound event: {e}");
        }
    }

    /// Implements the precondition table of §4.4.
    async fn handle_start(
        &self,
        camera_url: String,
        stream_key: StreamKey,
        court_id: CourtId,
    ) -> anyhow::Result<()> {
        let running_for_court: Vec<StreamRecord> = self
            .store
            .find_running()
            .await?
            .into_iter()
            .filter(|r| r.court_id == court_id)
            .collect();

        match decision::evaluate_start(&running_for_court, &stream_key) {
            StartDecision::Proceed => {
                self.spawn_new(camera_url, stream_key, court_id).await
            }
            StartDecision::Duplicate(existing) => {
                tracing::info!(
                    record_id = %existing.id,
                    "duplicate start event, no-op",
                );
                Ok(())
            }
            StartDecision::ProceedAfterCorrection(anomaly, records) => {
                tracing::warn!(
                    ?anomaly,
                    court_id = %court_id,
                    "correcting precondition anomaly before spawn",
                );
                for mut record in records {
                    self.correct_anomaly(&mut record, anomaly).await?;
                }
                self.spawn_new(camera_url, stream_key, court_id).await
            }
        }
    }

    async fn correct_anomaly(
        &self,
        record: &mut StreamRecord,
        anomaly: PreconditionAnomaly,
    ) -> anyhow::Result<()> {
        let target = match anomaly {
            PreconditionAnomaly::StreamRunningWithoutPid
            | PreconditionAnomaly::DeadProcessDetected => StreamState::Failed,
            PreconditionAnomaly::InvalidStreamKey
            | PreconditionAnomaly::MultipleStreamsRunning => {
                StreamState::Stopped
            }
        };

        if target == StreamState::Stopped {
            if let Some(pid) = record.process_id {
                self.driver.stop_stream(pid).await;
            }
        }

        record.process_id = None;
        record.transition_to(target, Utc::now())?;
        self.store.save(record).await?;
        Ok(())
    }

    async fn spawn_new(
        &self,
        camera_url: String,
        stream_key: StreamKey,
        court_id: CourtId,
    ) -> anyhow::Result<()> {
        let has_audio = crate::driver::detect_audio(
            &self.config.ffprobe_path,
            &camera_url,
        )
        .await;

        let mut record = StreamRecord::new(
            camera_url.clone(),
            stream_key.clone(),
            court_id.clone(),
            Utc::now(),
        );
        record.has_audio = has_audio;
        self.store.save(&record).await?;

        let request = StartRequest {
            record_id: record.id.clone(),
            camera_url,
            stream_key,
            court_id,
            has_audio,
        };

        match self
            .driver
            .start_stream(
                request,
                &self.config.transcode,
                self.exited_tx.clone(),
            )
            .await
        {
            Ok(handle) => {
                record.process_id = Some(handle.pid);
                record.transition_to(StreamState::Running, Utc::now())?;
                self.store.save(&record).await?;

                if let Err(e) = self
                    .control_plane
                    .go_live_youtube(&record.court_id, &record.stream_key)
                    .await
                {
                    tracing::warn!(
                        record_id = %record.id,
                        "go-live notification failed: {e}",
                    );
                }
            }
            Err(e) => {
                tracing::warn!(
                    record_id = %record.id,
                    "failed to start transcoder: {e}",
                );
                record.transition_to(StreamState::Failed, Utc::now())?;
                self.store.save(&record).await?;
            }
        }
        Ok(())
    }

    async fn handle_stop(
        &self,
        camera_url: String,
        stream_key: StreamKey,
        court_id: CourtId,
    ) -> anyhow::Result<()> {
        let matching: Vec<StreamRecord> = self
            .store
            .find_running()
            .await?
            .into_iter()
            .filter(|r| {
                r.court_id == court_id
                    && r.stream_key == stream_key
                    && r.camera_url == camera_url
            })
            .collect();

        if matching.is_empty() {
            tracing::info!(
                court_id = %court_id,
                "stop event for a court with no matching running stream",
            );
            return Ok(());
        }

        for record in matching {
            self.stop_running_record(record).await?;
        }
        Ok(())
    }

    /// Marks `record` as an expected exit, persists that before the driver
    /// is asked to terminate its process, so a crash between the two steps
    /// still leaves the record readable as "stop requested" rather than
    /// `RUNNING`. Shared by [`Self::handle_stop`] and [`Self::shutdown`].
    async fn stop_running_record(
        &self,
        mut record: StreamRecord,
    ) -> anyhow::Result<()> {
        record.expected_exit = true;
        record.updated_at = Utc::now();
        self.store.save(&record).await?;
        if let Some(pid) = record.process_id {
            self.driver.stop_stream(pid).await;
        }
        Ok(())
    }

    async fn handle_process_exited(&self, exited: ProcessExited) {
        let id = exited.request.record_id.clone();
        let record = match self.store.find_by_id(&id).await {
            Ok(Some(r)) => r,
            Ok(None) => {
                tracing::warn!(record_id = %id, "exited process has no record");
                return;
            }
            Err(e) => {
                tracing::warn!("failed to load exited record {id}: {e}");
                return;
            }
        };

        let mut record = record;
        let target = if record.expected_exit {
            StreamState::Stopped
        } else {
            tracing::warn!(
                record_id = %record.id,
                "transcoder exited without a prior stop request",
            );
            StreamState::Failed
        };

        record.process_id = None;
        record.expected_exit = false;
        if let Err(e) = record.transition_to(target, Utc::now()) {
            tracing::warn!("{e}");
            return;
        }
        if let Err(e) = self.store.save(&record).await {
            tracing::warn!("failed to persist exited record: {e}");
        }
    }

    async fn handle_tick(&self) {
        if !self.control_plane.is_connected() {
            self.control_plane.reconnect();
        }

        match self.store.find_running().await {
            Ok(records) => {
                for mut record in records {
                    let Some(pid) = record.process_id else {
                        continue;
                    };
                    if TranscoderDriver::is_process_running(pid) {
                        continue;
                    }
                    tracing::warn!(
                        record_id = %record.id,
                        "health tick found a dead process",
                    );
                    record.process_id = None;
                    if record
                        .transition_to(StreamState::Failed, Utc::now())
                        .is_ok()
                    {
                        if let Err(e) = self.store.save(&record).await {
                            tracing::warn!(
                                "failed to persist dead-process record: {e}",
                            );
                        }
                    }
                }
            }
            Err(e) => tracing::warn!("health tick failed to read store: {e}"),
        }

        if let Err(e) = self.control_plane.send_heartbeat().await {
            tracing::warn!("heartbeat failed: {e}");
        }
    }

    /// Stops every running stream via the same path as a `Stop` use-case
    /// (§4.4), then kills any process the driver still tracks, so a dead
    /// pid found in the store does not block teardown.
    async fn shutdown(&self) {
        match self.store.find_running().await {
            Ok(records) => {
                for record in records {
                    let id = record.id.clone();
                    if let Err(e) = self.stop_running_record(record).await {
                        tracing::warn!(
                            record_id = %id,
                            "failed to persist stop on shutdown: {e}",
                        );
                    }
                }
            }
            Err(e) => {
                tracing::warn!("shutdown failed to read store: {e}");
            }
        }
        self.driver.kill_all_processes().await;
    }
}
