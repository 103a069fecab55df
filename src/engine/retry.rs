use crate::horizon::{ErrorClass, HorizonFailure};

/// What the worker does with a job after a rejected submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Leave the job queued; a later cycle picks it up again.
    Requeue,
    /// Requeue and alert; the error points at our own bookkeeping.
    RequeueWithAlert,
    /// Mark the job failed and alert the operator.
    MarkFailed,
    /// Mark the job failed without alerting; an expected receiver condition.
    MarkFailedQuietly,
}

/// Maps classified Horizon rejections onto queue actions.
pub struct RetryPolicy;

impl RetryPolicy {
    pub fn decide(&self, failure: &HorizonFailure) -> RetryDecision {
        match failure.classify() {
            ErrorClass::Terminal => {
                if failure.destination_account_not_ready() {
                    RetryDecision::MarkFailedQuietly
                } else {
                    RetryDecision::MarkFailed
                }
            }
            ErrorClass::SequenceConflict => RetryDecision::RequeueWithAlert,
            ErrorClass::Indeterminate | ErrorClass::Expired | ErrorClass::Unclassified => {
                RetryDecision::Requeue
            }
        }
    }
}
