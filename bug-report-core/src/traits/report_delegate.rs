use crate::models::report::ReportOutcome;
use crate::models::state::{FailureReason, ReportState};

/// Event delegate for the UI layer.
///
/// Methods are called from whichever thread drives the lifecycle (the
/// caller of `stop_and_submit`, or an upload worker). Implementations should
/// marshal to the UI thread if needed.
pub trait ReportDelegate: Send + Sync {
    fn on_state_changed(&self, state: &ReportState);

    fn on_upload_progress(&self, bytes_sent: u64, total_bytes: u64);

    /// Called once when the report enters `Failed`.
    fn on_error(&self, reason: &FailureReason);

    fn on_report_submitted(&self, outcome: &ReportOutcome);
}
