use super::*;

// =============================================================================
// data table
// =============================================================================

#[test]
fn claim_only_from_inactive() {
    assert_eq!(DataPhase::Inactive.next(DataEvent::Claim), Some(DataPhase::Claiming));
    assert_eq!(DataPhase::Claiming.next(DataEvent::Claim), None);
    assert_eq!(DataPhase::Live.next(DataEvent::Claim), None);
    assert_eq!(DataPhase::Completed.next(DataEvent::Claim), None);
}

#[test]
fn confirm_reaches_live_from_claim_or_mirror() {
    assert_eq!(DataPhase::Claiming.next(DataEvent::Confirm), Some(DataPhase::Live));
    assert_eq!(DataPhase::Inactive.next(DataEvent::Confirm), Some(DataPhase::Live));
    assert_eq!(DataPhase::Live.next(DataEvent::Confirm), None);
}

#[test]
fn completion_fires_once() {
    assert_eq!(DataPhase::Live.next(DataEvent::Complete), Some(DataPhase::Completed));
    assert_eq!(DataPhase::Completed.next(DataEvent::Complete), None);
    assert_eq!(DataPhase::Inactive.next(DataEvent::Complete), None);
}

#[test]
fn completed_is_pinned_against_loss() {
    assert_eq!(DataPhase::Completed.next(DataEvent::Lose), None);
    assert_eq!(DataPhase::Completed.next(DataEvent::Confirm), None);
    assert_eq!(DataPhase::Completed.next(DataEvent::Release), Some(DataPhase::Inactive));
}

#[test]
fn live_requires_passing_through_inactive() {
    let phase = DataPhase::Completed.next(DataEvent::Release).unwrap();
    assert_eq!(phase, DataPhase::Inactive);
    assert_eq!(phase.next(DataEvent::Confirm), Some(DataPhase::Live));
}

#[test]
fn release_from_inactive_is_noop() {
    assert_eq!(DataPhase::Inactive.next(DataEvent::Release), None);
    assert_eq!(DataPhase::Inactive.next(DataEvent::Lose), None);
}

// =============================================================================
// progress
// =============================================================================

#[test]
fn progress_counts_true_flags() {
    let mut session = DataSession::fresh("FLD_1");
    assert_eq!(progress(&session), 0);
    session.connected = true;
    assert_eq!(progress(&session), 20);
    session.sensor_file_ready = true;
    session.image_file_ready = true;
    assert_eq!(progress(&session), 60);
    session.audio_file_ready = true;
    session.transmission_completed = true;
    assert_eq!(progress(&session), 100);
}

#[test]
fn progress_ignores_flag_order() {
    let session = DataSession { audio_file_ready: true, ..DataSession::zeroed() };
    assert_eq!(progress(&session), 20);
}

// =============================================================================
// record table
// =============================================================================

#[test]
fn record_finishes_once_and_resets() {
    assert_eq!(RecordPhase::Waiting.next(RecordEvent::Finish), Some(RecordPhase::Done));
    assert_eq!(RecordPhase::Done.next(RecordEvent::Finish), None);
    assert_eq!(RecordPhase::Done.next(RecordEvent::Reset), Some(RecordPhase::Waiting));
    assert_eq!(RecordPhase::Waiting.next(RecordEvent::Reset), None);
}
