//! Recovery & Orphan Sweeper (§4.5): runs once at startup, before the
//! supervisor accepts any event.
//!
//! A restarted agent has no [`crate::driver::TranscoderHandle`] for any
//! transcoder a previous instance spawned — the in-memory process table is
//! gone along with the process that held it. Every `RUNNING` record is
//! therefore stale by construction: this pass marks each one `FAILED`,
//! terminates its transcoder if the OS process actually survived the
//! restart, sweeps any further orphaned transcoder binary the record set
//! doesn't even know about, and then wipes the store so the agent starts
//! from a clean slate and waits for the control plane to re-issue `start`
//! events for whatever should be running.

use chrono::Utc;
use courtstream_log::tracing;

use crate::{
    driver::TranscoderDriver,
    proc,
    record::StreamState,
    store::RecordStore,
};

/// Runs the recovery pass described above.
///
/// # Errors
///
/// Propagates I/O errors reading or clearing `store`.
pub async fn recover(
    store: &RecordStore,
    driver: &TranscoderDriver,
) -> anyhow::Result<()> {
    let records = store.find_all().await?;
    let now = Utc::now();

    for mut record in records {
        if record.state != StreamState::Running {
            continue;
        }

        let pid = record.process_id;
        if let Some(pid) = pid {
            if TranscoderDriver::is_process_running(pid) {
                tracing::warn!(
                    record_id = %record.id,
                    pid,
                    "stopping transcoder that survived a restart",
                );
                driver.stop_stream(pid).await;
            }
        }

        record.process_id = None;
        if record.transition_to(StreamState::Failed, now).is_ok() {
            store.save(&record).await?;
        }
    }

    if let Err(e) = proc::kill_process_by_name(&driver.binary_name()).await {
        tracing::warn!("orphan sweep failed: {e}");
    }

    store.clear().await?;
    Ok(())
}
