use serde::Deserialize;
use std::fmt;

use crate::error::AppError;

/// Transaction result codes classified as permanent rejections.
const TERMINAL_TX_CODES: [&str; 3] = [
    "tx_bad_auth",
    "tx_bad_auth_extra",
    "tx_insufficient_balance",
];

/// Operation result codes classified as permanent rejections.
const TERMINAL_OP_CODES: [&str; 8] = [
    "op_bad_auth",
    "op_underfunded",
    "op_src_not_authorized",
    "op_no_destination",
    "op_no_trust",
    "op_line_full",
    "op_not_authorized",
    "op_no_issuer",
];

/// Subset of terminal operation codes caused by the receiving account not
/// being ready (unfunded, no trustline, not authorized). Expected receiver
/// conditions, excluded from operator alerting.
const DESTINATION_NOT_READY_OP_CODES: [&str; 4] = [
    "op_not_authorized",
    "op_no_trust",
    "op_no_destination",
    "op_line_full",
];

/// Result codes of a rejected submission: one transaction-level code, the
/// inner code when a fee bump was rejected, and per-operation codes.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ResultCodes {
    #[serde(default)]
    pub transaction: Option<String>,
    #[serde(default)]
    pub inner_transaction: Option<String>,
    #[serde(default)]
    pub operations: Vec<String>,
}

impl ResultCodes {
    pub fn is_empty(&self) -> bool {
        self.transaction.is_none() && self.inner_transaction.is_none() && self.operations.is_empty()
    }
}

/// Horizon problem+json body returned with non-2xx responses.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HorizonProblem {
    #[serde(rename = "type", default)]
    pub problem_type: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub extras: Option<ProblemExtras>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProblemExtras {
    #[serde(default)]
    pub result_codes: Option<ResultCodes>,
    #[serde(default)]
    pub result_xdr: Option<String>,
    #[serde(default)]
    pub envelope_xdr: Option<String>,
    #[serde(default)]
    pub hash: Option<String>,
}

/// How a failed submission should be treated by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Outcome unknown or retriable after backoff; feeds the admission limiter.
    Indeterminate,
    /// Can never succeed; the job is marked failed.
    Terminal,
    /// Bad sequence number; a channel account bookkeeping bug signal.
    SequenceConflict,
    /// Missed its time bounds; expected under ledger-closing jitter.
    Expired,
    /// Anything else; retried without alerting.
    Unclassified,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Indeterminate => "indeterminate",
            ErrorClass::Terminal => "terminal",
            ErrorClass::SequenceConflict => "sequence_conflict",
            ErrorClass::Expired => "expired",
            ErrorClass::Unclassified => "unclassified",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A failed interaction with Horizon, flattened into the fields the
/// classifier cares about. Kept structured so every retry decision can log
/// the original rejection.
#[derive(Debug, Clone)]
pub struct HorizonFailure {
    pub status_code: Option<u16>,
    pub timed_out: bool,
    pub result_codes: ResultCodes,
    pub problem_type: Option<String>,
    pub title: Option<String>,
    pub detail: Option<String>,
    pub result_xdr: Option<String>,
}

impl HorizonFailure {
    pub fn from_problem(status_code: u16, problem: HorizonProblem) -> Self {
        let extras = problem.extras.unwrap_or_default();
        Self {
            status_code: Some(status_code),
            timed_out: false,
            result_codes: extras.result_codes.unwrap_or_default(),
            problem_type: problem.problem_type,
            title: problem.title,
            detail: problem.detail,
            result_xdr: extras.result_xdr,
        }
    }

    pub fn from_transport(error: &reqwest::Error) -> Self {
        Self {
            status_code: error.status().map(|s| s.as_u16()),
            timed_out: error.is_timeout(),
            result_codes: ResultCodes::default(),
            problem_type: None,
            title: None,
            detail: Some(error.to_string()),
            result_xdr: None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status_code == Some(404)
    }

    pub fn classify(&self) -> ErrorClass {
        if self.timed_out || matches!(self.status_code, Some(429) | Some(504)) {
            return ErrorClass::Indeterminate;
        }
        if self.has_tx_code("tx_insufficient_fee") {
            return ErrorClass::Indeterminate;
        }
        if self.is_terminal_rejection() {
            return ErrorClass::Terminal;
        }
        if self.has_tx_code("tx_bad_seq") {
            return ErrorClass::SequenceConflict;
        }
        if self.has_tx_code("tx_too_late") {
            return ErrorClass::Expired;
        }
        ErrorClass::Unclassified
    }

    /// True when the rejection is down to the receiving account not being
    /// ready for the asset, rather than anything on our side.
    pub fn destination_account_not_ready(&self) -> bool {
        self.result_codes
            .operations
            .iter()
            .any(|op| DESTINATION_NOT_READY_OP_CODES.contains(&op.as_str()))
    }

    fn has_tx_code(&self, code: &str) -> bool {
        self.result_codes.transaction.as_deref() == Some(code)
            || self.result_codes.inner_transaction.as_deref() == Some(code)
    }

    fn is_terminal_rejection(&self) -> bool {
        TERMINAL_TX_CODES.iter().any(|code| self.has_tx_code(code))
            || self
                .result_codes
                .operations
                .iter()
                .any(|op| TERMINAL_OP_CODES.contains(&op.as_str()))
    }
}

impl fmt::Display for HorizonFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "horizon response error")?;
        if self.timed_out {
            write!(f, " (request timed out)")?;
        }
        if let Some(code) = self.status_code {
            write!(f, ": StatusCode={}", code)?;
        }
        if let Some(problem_type) = &self.problem_type {
            write!(f, ", Type={}", problem_type)?;
        }
        if let Some(title) = &self.title {
            write!(f, ", Title={}", title)?;
        }
        if let Some(detail) = &self.detail {
            write!(f, ", Detail={}", detail)?;
        }
        if !self.result_codes.is_empty() {
            write!(f, ", Extras=")?;
            let mut first = true;
            if let Some(tx) = &self.result_codes.transaction {
                write!(f, "transaction: {}", tx)?;
                first = false;
            }
            if let Some(inner) = &self.result_codes.inner_transaction {
                if !first {
                    write!(f, " - ")?;
                }
                write!(f, "inner transaction: {}", inner)?;
                first = false;
            }
            if !self.result_codes.operations.is_empty() {
                if !first {
                    write!(f, " - ")?;
                }
                write!(
                    f,
                    "operation codes: [ {} ]",
                    self.result_codes.operations.join(", ")
                )?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for HorizonFailure {}

impl From<HorizonFailure> for AppError {
    fn from(failure: HorizonFailure) -> Self {
        AppError::Horizon(failure.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(status_code: Option<u16>, timed_out: bool, codes: ResultCodes) -> HorizonFailure {
        HorizonFailure {
            status_code,
            timed_out,
            result_codes: codes,
            problem_type: None,
            title: None,
            detail: None,
            result_xdr: None,
        }
    }

    fn tx_code(code: &str) -> ResultCodes {
        ResultCodes {
            transaction: Some(code.to_string()),
            inner_transaction: None,
            operations: vec![],
        }
    }

    fn op_codes(codes: &[&str]) -> ResultCodes {
        ResultCodes {
            transaction: Some("tx_failed".to_string()),
            inner_transaction: None,
            operations: codes.iter().map(|c| c.to_string()).collect(),
        }
    }

    #[test]
    fn classifies_overload_responses_as_indeterminate() {
        assert_eq!(
            failure(Some(504), true, ResultCodes::default()).classify(),
            ErrorClass::Indeterminate
        );
        assert_eq!(
            failure(Some(429), false, ResultCodes::default()).classify(),
            ErrorClass::Indeterminate
        );
        assert_eq!(
            failure(None, true, ResultCodes::default()).classify(),
            ErrorClass::Indeterminate
        );
        assert_eq!(
            failure(Some(400), false, tx_code("tx_insufficient_fee")).classify(),
            ErrorClass::Indeterminate
        );
    }

    #[test]
    fn classifies_permanent_rejections_as_terminal() {
        assert_eq!(
            failure(Some(400), false, tx_code("tx_bad_auth")).classify(),
            ErrorClass::Terminal
        );
        assert_eq!(
            failure(Some(400), false, tx_code("tx_insufficient_balance")).classify(),
            ErrorClass::Terminal
        );
        assert_eq!(
            failure(Some(400), false, op_codes(&["op_no_trust"])).classify(),
            ErrorClass::Terminal
        );
        assert_eq!(
            failure(Some(400), false, op_codes(&["op_success", "op_underfunded"])).classify(),
            ErrorClass::Terminal
        );
    }

    #[test]
    fn classifies_sequence_and_expiry_codes() {
        assert_eq!(
            failure(Some(400), false, tx_code("tx_bad_seq")).classify(),
            ErrorClass::SequenceConflict
        );
        assert_eq!(
            failure(Some(400), false, tx_code("tx_too_late")).classify(),
            ErrorClass::Expired
        );

        // Fee-bump rejections surface the interesting code on the inner tx.
        let inner = ResultCodes {
            transaction: Some("tx_fee_bump_inner_failed".to_string()),
            inner_transaction: Some("tx_bad_seq".to_string()),
            operations: vec![],
        };
        assert_eq!(
            failure(Some(400), false, inner).classify(),
            ErrorClass::SequenceConflict
        );
    }

    #[test]
    fn unknown_rejections_are_unclassified() {
        assert_eq!(
            failure(Some(400), false, tx_code("tx_malformed")).classify(),
            ErrorClass::Unclassified
        );
        assert_eq!(
            failure(Some(500), false, ResultCodes::default()).classify(),
            ErrorClass::Unclassified
        );
    }

    #[test]
    fn destination_not_ready_is_a_subset_of_terminal() {
        let not_ready = failure(Some(400), false, op_codes(&["op_no_trust"]));
        assert_eq!(not_ready.classify(), ErrorClass::Terminal);
        assert!(not_ready.destination_account_not_ready());

        let underfunded = failure(Some(400), false, op_codes(&["op_underfunded"]));
        assert_eq!(underfunded.classify(), ErrorClass::Terminal);
        assert!(!underfunded.destination_account_not_ready());

        let bad_auth = failure(Some(400), false, tx_code("tx_bad_auth"));
        assert!(!bad_auth.destination_account_not_ready());
    }

    #[test]
    fn parses_a_horizon_problem_body() {
        let body = r#"{
            "type": "https://stellar.org/horizon-errors/transaction_failed",
            "title": "Transaction Failed",
            "status": 400,
            "detail": "The transaction failed when submitted to the stellar network.",
            "extras": {
                "envelope_xdr": "AAAA...",
                "result_xdr": "AAAB...",
                "result_codes": {
                    "transaction": "tx_failed",
                    "operations": ["op_success", "op_no_destination"]
                }
            }
        }"#;

        let problem: HorizonProblem = serde_json::from_str(body).unwrap();
        let failure = HorizonFailure::from_problem(400, problem);

        assert_eq!(failure.classify(), ErrorClass::Terminal);
        assert!(failure.destination_account_not_ready());
        assert_eq!(failure.result_xdr.as_deref(), Some("AAAB..."));
    }

    #[test]
    fn display_includes_status_and_result_codes() {
        let mut codes = op_codes(&["op_no_trust", "op_success"]);
        codes.inner_transaction = Some("tx_failed".to_string());
        let mut failure = failure(Some(400), false, codes);
        failure.problem_type = Some("transaction_failed".to_string());
        failure.title = Some("Transaction Failed".to_string());

        assert_eq!(
            failure.to_string(),
            "horizon response error: StatusCode=400, Type=transaction_failed, \
             Title=Transaction Failed, Extras=transaction: tx_failed - \
             inner transaction: tx_failed - operation codes: [ op_no_trust, op_success ]"
        );
    }
}
