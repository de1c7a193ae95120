//! Exit code logic for the pipeline process.
//!
//! Single responsibility: map run outcome counts to the process exit outcome.

use crate::ProcessExit;

/// Determines the process exit outcome from the run summary counts.
///
/// An interrupted run is never a full success: records were left pending.
pub(crate) fn determine_exit_outcome(
    published: usize,
    failed: usize,
    interrupted: bool,
) -> ProcessExit {
    if failed == 0 && !interrupted {
        ProcessExit::Success
    } else if published > 0 || interrupted {
        ProcessExit::Partial
    } else {
        ProcessExit::Failure
    }
}
