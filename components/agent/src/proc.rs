//! Process lookup/kill helpers used by the orphan sweeper (§4.5).

use anyhow::anyhow;
use courtstream_log::tracing;
use tokio::process::Command;

/// Sends `SIGTERM` to every running process named `process_name`.
pub(crate) async fn kill_process_by_name(
    process_name: &str,
) -> Result<(), anyhow::Error> {
    // Find the PIDs of the running processes with process_name using `pgrep`
    let output = Command::new("pgrep")
        .arg(process_name)
        .output()
        .await
        .map_err(|e| anyhow!("Failed to execute pgrep: {e}"))?;

    if !output.status.success() {
        // No running process with process_name
        return Ok(());
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let pids: Vec<i32> = stdout
        .lines()
        .filter_map(|line| line.parse::<i32>().ok())
        .collect();

    for pid in pids {
        _ = kill_process(pid).map_err(|err| {
            tracing::error!("failed to kill orphaned process {pid}: {err}");
        });
    }

    Ok(())
}

/// Sends `SIGTERM` to the process with the given pid.
pub(crate) fn kill_process(pid: i32) -> Result<(), anyhow::Error> {
    use nix::{
        sys::signal::{kill, Signal::SIGTERM},
        unistd::Pid,
    };
    if let Err(err) = kill(Pid::from_raw(pid), SIGTERM) {
        Err(anyhow!("failed to send SIGTERM to process {pid}: {err}"))
    } else {
        Ok(())
    }
}
