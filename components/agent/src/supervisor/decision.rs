//! The precondition decision table of §4.4, applied when a `start` event
//! arrives for a court.

use crate::{
    driver::TranscoderDriver,
    error::PreconditionAnomaly,
    record::{StreamKey, StreamRecord},
};

/// What the supervisor should do with a `start` event, after checking the
/// records already on file for its court.
#[derive(Debug)]
pub enum StartDecision {
    /// No conflicting record; proceed to spawn.
    Proceed,
    /// An anomaly was found and corrected; proceed to spawn once the
    /// correction (recorded alongside) has been applied.
    ProceedAfterCorrection(PreconditionAnomaly, Vec<StreamRecord>),
    /// A live process is already serving this exact request.
    Duplicate(StreamRecord),
}

/// Evaluates the decision table in §4.4 against the records currently on
/// file for one court.
///
/// `running` must contain only records already filtered to this court and
/// `state == RUNNING`; `requested_key` is the `streamKey` of the incoming
/// `start` event.
#[must_use]
pub fn evaluate_start(
    running: &[StreamRecord],
    requested_key: &StreamKey,
) -> StartDecision {
    match running {
        [] => StartDecision::Proceed,

        [record] if record.process_id.is_none() => {
            StartDecision::ProceedAfterCorrection(
                PreconditionAnomaly::StreamRunningWithoutPid,
                vec![record.clone()],
            )
        }

        [record]
            if !TranscoderDriver::is_process_running(
                record.process_id.expect("checked above"),
            ) =>
        {
            StartDecision::ProceedAfterCorrection(
                PreconditionAnomaly::DeadProcessDetected,
                vec![record.clone()],
            )
        }

        [record] if &record.stream_key == requested_key => {
            StartDecision::Duplicate(record.clone())
        }

        [record] => StartDecision::ProceedAfterCorrection(
            PreconditionAnomaly::InvalidStreamKey,
            vec![record.clone()],
        ),

        multiple => StartDecision::ProceedAfterCorrection(
            PreconditionAnomaly::MultipleStreamsRunning,
            multiple.to_vec(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::record::{CourtId, StreamState};

    fn record_with(key: &str, pid: Option<u32>) -> StreamRecord {
        let mut r = StreamRecord::new(
            "rtsp://cam/1".into(),
            StreamKey(key.into()),
            CourtId("C1".into()),
            Utc::now(),
        );
        r.state = StreamState::Running;
        r.process_id = pid;
        r
    }

    #[test]
    fn no_running_record_proceeds() {
        let decision = evaluate_start(&[], &StreamKey("K".into()));
        assert!(matches!(decision, StartDecision::Proceed));
    }

    #[test]
    fn running_without_pid_is_corrected() {
        let running = vec![record_with("K", None)];
        let decision = evaluate_start(&running, &StreamKey("K".into()));
        assert!(matches!(
            decision,
            StartDecision::ProceedAfterCorrection(
                PreconditionAnomaly::StreamRunningWithoutPid,
                _
            )
        ));
    }

    #[test]
    fn same_key_alive_is_duplicate() {
        // pid 1 is conventionally alive (init); good enough as a
        // deterministic "alive" pid for this pure decision-table test.
        let running = vec![record_with("K", Some(1))];
        let decision = evaluate_start(&running, &StreamKey("K".into()));
        assert!(matches!(decision, StartDecision::Duplicate(_)));
    }

    #[test]
    fn different_key_alive_is_corrected() {
        let running = vec![record_with("K1", Some(1))];
        let decision = evaluate_start(&running, &StreamKey("K2".into()));
        assert!(matches!(
            decision,
            StartDecision::ProceedAfterCorrection(
                PreconditionAnomaly::InvalidStreamKey,
                _
            )
        ));
    }

    #[test]
    fn multiple_running_is_corrected() {
        let running = vec![record_with("K1", Some(1)), record_with("K2", Some(1))];
        let decision = evaluate_start(&running, &StreamKey("K1".into()));
        assert!(matches!(
            decision,
            StartDecision::ProceedAfterCorrection(
                PreconditionAnomaly::MultipleStreamsRunning,
                records
            ) if records.len() == 2
        ));
    }
}
