use std::sync::Arc;

use tracing::{error, info, warn};

use crate::engine::ledger_tracker::LedgerNumberTracker;
use crate::engine::limiter::AdmissionLimiter;
use crate::engine::retry::{RetryDecision, RetryPolicy};
use crate::engine::signing::SignatureService;
use crate::error::{AppError, AppResult};
use crate::events::Message;
use crate::horizon::{ErrorClass, HorizonClient, HorizonFailure, TransactionResponse};
use crate::monitor::{CrashTracker, MonitorService, TxMetadata, TxOutcome};
use crate::store::bundles::JobBundle;
use crate::store::models::{ChannelAccount, Transaction, TransactionStatus};
use crate::store::SubmitterStore;
use crate::submitter::builder::EnvelopeBuilder;
use crate::submitter::handlers::HandlerRegistry;

/// Processes one claimed job bundle end to end.
///
/// Every durable write happens before the wire call it covers, so a crash at
/// any point leaves the row in a state the next polling cycle can pick up
/// without double-submitting.
pub struct TransactionWorker {
    store: Arc<dyn SubmitterStore>,
    horizon: Arc<dyn HorizonClient>,
    ledger_tracker: Arc<dyn LedgerNumberTracker>,
    signer: Arc<dyn SignatureService>,
    builder: EnvelopeBuilder,
    handlers: HandlerRegistry,
    limiter: Arc<AdmissionLimiter>,
    retry_policy: RetryPolicy,
    monitor: Arc<dyn MonitorService>,
    crash_tracker: Arc<dyn CrashTracker>,
}

/// A claim is only actionable while the row is still queued and both ledger
/// locks from the claim are unexpired.
fn claim_is_current(
    job: &Transaction,
    channel_account: &ChannelAccount,
    current_ledger: i32,
) -> bool {
    matches!(
        job.status,
        TransactionStatus::Pending | TransactionStatus::Processing
    ) && job.is_locked(current_ledger)
        && channel_account.is_locked(current_ledger)
}

impl TransactionWorker {
    pub fn new(
        store: Arc<dyn SubmitterStore>,
        horizon: Arc<dyn HorizonClient>,
        ledger_tracker: Arc<dyn LedgerNumberTracker>,
        signer: Arc<dyn SignatureService>,
        builder: EnvelopeBuilder,
        handlers: HandlerRegistry,
        limiter: Arc<AdmissionLimiter>,
        retry_policy: RetryPolicy,
        monitor: Arc<dyn MonitorService>,
        crash_tracker: Arc<dyn CrashTracker>,
    ) -> Self {
        Self {
            store,
            horizon,
            ledger_tracker,
            signer,
            builder,
            handlers,
            limiter,
            retry_policy,
            monitor,
            crash_tracker,
        }
    }

    /// Entry point for the scheduler. Infrastructure failures are reported
    /// and swallowed; the job keeps its last durable state and surfaces
    /// again once its ledger lock expires.
    pub async fn process(&self, bundle: JobBundle) {
        let transaction_id = bundle.transaction.id;
        if let Err(e) = self.run(&bundle).await {
            self.crash_tracker.report(
                &format!("processing transaction {}", transaction_id),
                &e.to_string(),
            );
        }
    }

    async fn run(&self, bundle: &JobBundle) -> AppResult<()> {
        let job = &bundle.transaction;

        let current_ledger = self.ledger_tracker.get_ledger_number().await?;
        if !claim_is_current(job, &bundle.channel_account, current_ledger) {
            warn!(
                transaction_id = %job.id,
                current_ledger,
                "Claim no longer valid, skipping job"
            );
            return Ok(());
        }

        if job.needs_reconciliation() {
            self.reconcile(bundle).await
        } else {
            self.submit(bundle).await
        }
    }

    async fn submit(&self, bundle: &JobBundle) -> AppResult<()> {
        let job = &bundle.transaction;
        let channel = bundle.channel_account.public_key.as_str();

        self.monitor.record_tx_outcome(
            TxOutcome::ProcessingStarted,
            job,
            &self.metadata(job, channel, false, None),
        );

        if let Err(validation) = job.validate_for_submission() {
            return self
                .fail_job(job, channel, validation.to_string(), true, false)
                .await;
        }

        let handler = self.handlers.get(job.kind)?;
        let sequence = self
            .horizon
            .get_account_sequence(channel)
            .await
            .map_err(AppError::from)?;

        let prepared = self
            .builder
            .build_and_sign(
                job,
                channel,
                sequence,
                bundle.locked_until_ledger_number,
                handler.as_ref(),
                self.signer.as_ref(),
            )
            .await?;

        // Hash and envelope become durable before the wire call; if we crash
        // past this point the next cycle reconciles instead of resubmitting.
        let job = self
            .store
            .save_hash_and_xdr_sent(
                job.id,
                &prepared.hash_hex,
                &prepared.envelope_xdr,
                self.signer.distribution_public_key(),
            )
            .await?;

        info!(
            transaction_id = %job.id,
            hash = %prepared.hash_hex,
            channel_account = channel,
            "📤 Submitting envelope"
        );

        match self.horizon.submit_transaction(&prepared.envelope_xdr).await {
            Ok(response) => {
                self.limiter.record_success();
                self.finish_success(&job, channel, response).await
            }
            Err(failure) => self.handle_rejection(&job, channel, failure).await,
        }
    }

    async fn finish_success(
        &self,
        job: &Transaction,
        channel: &str,
        response: TransactionResponse,
    ) -> AppResult<()> {
        if let Some(result_xdr) = response.result_xdr.as_deref() {
            self.store.save_xdr_received(job.id, result_xdr).await?;
        }

        if !response.successful {
            self.monitor.record_tx_outcome(
                TxOutcome::ProcessingError,
                job,
                &self.metadata(
                    job,
                    channel,
                    true,
                    Some("accepted response not flagged successful".to_string()),
                ),
            );
            return Err(AppError::Horizon(format!(
                "transaction {} accepted but not flagged successful",
                response.hash
            )));
        }

        self.complete_job(job, channel, TxOutcome::ProcessingSuccessful)
            .await
    }

    /// Terminal success path shared by submission and reconciliation. The
    /// completion event is built before anything is written, and committed
    /// atomically with the status row.
    async fn complete_job(
        &self,
        job: &Transaction,
        channel: &str,
        outcome: TxOutcome,
    ) -> AppResult<()> {
        let event = Message::for_payment_completed(job, TransactionStatus::Success, None)?;
        let updated = self
            .store
            .update_status(job.id, TransactionStatus::Success, None, Some(&event))
            .await?;

        self.store.unlock_channel_account(channel).await?;
        self.store.unlock_transaction(job.id).await?;

        self.monitor.record_tx_outcome(
            outcome,
            &updated,
            &self.metadata(&updated, channel, false, None),
        );
        info!(transaction_id = %updated.id, "✅ Transaction confirmed");
        Ok(())
    }

    async fn handle_rejection(
        &self,
        job: &Transaction,
        channel: &str,
        failure: HorizonFailure,
    ) -> AppResult<()> {
        let class = failure.classify();
        self.limiter.record_response(class);

        if let Some(result_xdr) = failure.result_xdr.as_deref() {
            self.store.save_xdr_received(job.id, result_xdr).await?;
        }

        match self.retry_policy.decide(&failure) {
            RetryDecision::MarkFailed => {
                self.fail_job(job, channel, failure.to_string(), true, true)
                    .await
            }
            RetryDecision::MarkFailedQuietly => {
                self.fail_job(job, channel, failure.to_string(), false, true)
                    .await
            }
            RetryDecision::RequeueWithAlert => {
                error!(
                    transaction_id = %job.id,
                    channel_account = channel,
                    "🚨 Sequence conflict on channel account: {}", failure
                );
                self.crash_tracker.report(
                    &format!("sequence conflict on channel account {}", channel),
                    &failure.to_string(),
                );
                self.requeue_job(job, channel, class, failure).await
            }
            RetryDecision::Requeue => self.requeue_job(job, channel, class, failure).await,
        }
    }

    /// Releases both locks without touching status or hash. A job that kept
    /// its hash is reconciled on the next claim instead of resubmitted.
    async fn requeue_job(
        &self,
        job: &Transaction,
        channel: &str,
        class: ErrorClass,
        failure: HorizonFailure,
    ) -> AppResult<()> {
        warn!(
            transaction_id = %job.id,
            class = %class,
            "↩️ Submission rejected, leaving job queued: {}", failure
        );

        self.store.unlock_channel_account(channel).await?;
        self.store.unlock_transaction(job.id).await?;

        self.monitor.record_tx_outcome(
            TxOutcome::ProcessingError,
            job,
            &self.metadata(job, channel, true, Some(failure.to_string())),
        );
        Ok(())
    }

    async fn fail_job(
        &self,
        job: &Transaction,
        channel: &str,
        message: String,
        alert: bool,
        is_horizon_error: bool,
    ) -> AppResult<()> {
        if alert {
            error!(transaction_id = %job.id, "🚨 Marking transaction failed: {}", message);
            self.crash_tracker
                .report(&format!("transaction {} marked failed", job.id), &message);
        } else {
            info!(
                transaction_id = %job.id,
                "Destination not ready, marking failed without alert: {}", message
            );
        }

        let event =
            Message::for_payment_completed(job, TransactionStatus::Error, Some(message.clone()))?;
        let updated = self
            .store
            .update_status(
                job.id,
                TransactionStatus::Error,
                Some(message.clone()),
                Some(&event),
            )
            .await?;

        self.store.unlock_channel_account(channel).await?;
        self.store.unlock_transaction(job.id).await?;

        self.monitor.record_tx_outcome(
            TxOutcome::ProcessingError,
            &updated,
            &self.metadata(&updated, channel, is_horizon_error, Some(message)),
        );
        Ok(())
    }

    async fn reconcile(&self, bundle: &JobBundle) -> AppResult<()> {
        let job = &bundle.transaction;
        let channel = bundle.channel_account.public_key.as_str();
        let hash = job
            .stellar_transaction_hash
            .as_deref()
            .ok_or_else(|| AppError::Internal("reconciliation requires a stored hash".to_string()))?;

        info!(transaction_id = %job.id, hash, "🔎 Reconciling previous submission");

        match self.horizon.get_transaction(hash).await {
            Ok(response) if response.successful => {
                if let Some(result_xdr) = response.result_xdr.as_deref() {
                    self.store.save_xdr_received(job.id, result_xdr).await?;
                }
                self.complete_job(job, channel, TxOutcome::ReconciliationSuccessful)
                    .await
            }
            Ok(_) => {
                info!(
                    transaction_id = %job.id,
                    hash,
                    "Previous attempt failed on chain, queueing a fresh attempt"
                );
                self.reprocess_job(job, channel).await
            }
            Err(failure) if failure.is_not_found() => {
                info!(
                    transaction_id = %job.id,
                    hash,
                    "Previous attempt never reached the network, queueing a fresh attempt"
                );
                self.reprocess_job(job, channel).await
            }
            Err(failure) => {
                // Unknown outcome: report and leave every lock in place so
                // nothing resubmits until the claim expires on its own.
                self.monitor.record_tx_outcome(
                    TxOutcome::ReconciliationFailure,
                    job,
                    &self.metadata(job, channel, true, Some(failure.to_string())),
                );
                Err(failure.into())
            }
        }
    }

    /// Resets the row for a clean second attempt; the row-level lock and the
    /// stale hash are cleared in the same statement.
    async fn reprocess_job(&self, job: &Transaction, channel: &str) -> AppResult<()> {
        self.store.prepare_for_reprocessing(job.id).await?;
        self.store.unlock_channel_account(channel).await?;
        Ok(())
    }

    fn metadata(
        &self,
        job: &Transaction,
        channel: &str,
        is_horizon_error: bool,
        error: Option<String>,
    ) -> TxMetadata {
        TxMetadata {
            kind: job.kind.as_str().to_string(),
            channel_account: Some(channel.to_string()),
            is_horizon_error,
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::signing::decorated_signature;
    use crate::engine::strkey;
    use crate::horizon::classify::ResultCodes;
    use crate::store::models::TransactionKind;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, Utc};
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;
    use sqlx::types::Json;
    use stellar_sdk::Keypair;
    use stellar_xdr::curr::DecoratedSignature;
    use uuid::Uuid;

    const PASSPHRASE: &str = "Test SDF Network ; September 2015";
    const DESTINATION: &str = "GCV2XK5LVOV2XK5LVOV2XK5LVOV2XK5LVOV2XK5LVOV2XK5LVOV2WIHP";

    type CallLog = Arc<Mutex<Vec<String>>>;

    struct TestSigner {
        distribution: Keypair,
        distribution_public: String,
        channel: Keypair,
        channel_public: String,
    }

    impl TestSigner {
        fn new() -> Self {
            let distribution =
                Keypair::from_secret_key(&strkey::encode_secret_seed(&[1u8; 32])).unwrap();
            let channel =
                Keypair::from_secret_key(&strkey::encode_secret_seed(&[2u8; 32])).unwrap();
            let distribution_public = distribution.public_key();
            let channel_public = channel.public_key();
            Self {
                distribution,
                distribution_public,
                channel,
                channel_public,
            }
        }
    }

    #[async_trait]
    impl SignatureService for TestSigner {
        fn distribution_public_key(&self) -> &str {
            &self.distribution_public
        }

        async fn sign_with_distribution(
            &self,
            payload: &[u8; 32],
        ) -> AppResult<DecoratedSignature> {
            let raw = self.distribution.sign(payload).unwrap();
            decorated_signature(&self.distribution_public, raw.to_vec())
        }

        async fn sign_with_channel_account(
            &self,
            public_key: &str,
            payload: &[u8; 32],
        ) -> AppResult<DecoratedSignature> {
            let raw = self.channel.sign(payload).unwrap();
            decorated_signature(public_key, raw.to_vec())
        }
    }

    struct FakeStore {
        log: CallLog,
        row: Mutex<Transaction>,
        events: Mutex<Vec<Message>>,
    }

    #[async_trait]
    impl SubmitterStore for FakeStore {
        async fn update_status(
            &self,
            _id: Uuid,
            to: TransactionStatus,
            status_message: Option<String>,
            event: Option<&Message>,
        ) -> AppResult<Transaction> {
            self.log.lock().push(format!("update_status:{}", to));
            let mut row = self.row.lock();
            row.status.can_transition_to(to)?;
            row.status = to;
            row.status_message = status_message;
            if to.is_terminal() {
                row.completed_at = Some(Utc::now());
            }
            if let Some(event) = event {
                self.events.lock().push(event.clone());
            }
            Ok(row.clone())
        }

        async fn save_hash_and_xdr_sent(
            &self,
            _id: Uuid,
            hash: &str,
            envelope_xdr: &str,
            distribution_account: &str,
        ) -> AppResult<Transaction> {
            self.log.lock().push("save_hash_and_xdr_sent".to_string());
            let mut row = self.row.lock();
            row.stellar_transaction_hash = Some(hash.to_string());
            row.xdr_sent = Some(envelope_xdr.to_string());
            row.distribution_account = Some(distribution_account.to_string());
            row.sent_at = Some(Utc::now());
            row.attempts_count += 1;
            Ok(row.clone())
        }

        async fn save_xdr_received(&self, _id: Uuid, result_xdr: &str) -> AppResult<()> {
            self.log.lock().push("save_xdr_received".to_string());
            self.row.lock().xdr_received = Some(result_xdr.to_string());
            Ok(())
        }

        async fn prepare_for_reprocessing(&self, _id: Uuid) -> AppResult<()> {
            self.log.lock().push("prepare_for_reprocessing".to_string());
            let mut row = self.row.lock();
            row.status = TransactionStatus::Pending;
            row.stellar_transaction_hash = None;
            row.xdr_sent = None;
            row.xdr_received = None;
            row.locked_at = None;
            row.locked_until_ledger_number = None;
            Ok(())
        }

        async fn unlock_transaction(&self, _id: Uuid) -> AppResult<()> {
            self.log.lock().push("unlock_transaction".to_string());
            let mut row = self.row.lock();
            row.locked_at = None;
            row.locked_until_ledger_number = None;
            Ok(())
        }

        async fn unlock_channel_account(&self, _public_key: &str) -> AppResult<()> {
            self.log.lock().push("unlock_channel_account".to_string());
            Ok(())
        }
    }

    struct FakeHorizon {
        log: CallLog,
        sequence: i64,
        submit_result: Mutex<Option<Result<TransactionResponse, HorizonFailure>>>,
        lookup_result: Mutex<Option<Result<TransactionResponse, HorizonFailure>>>,
    }

    #[async_trait]
    impl HorizonClient for FakeHorizon {
        async fn submit_transaction(
            &self,
            _envelope_xdr: &str,
        ) -> Result<TransactionResponse, HorizonFailure> {
            self.log.lock().push("submit_transaction".to_string());
            self.submit_result
                .lock()
                .take()
                .expect("no submit result scripted")
        }

        async fn get_transaction(&self, _hash: &str) -> Result<TransactionResponse, HorizonFailure> {
            self.log.lock().push("get_transaction".to_string());
            self.lookup_result
                .lock()
                .take()
                .expect("no lookup result scripted")
        }

        async fn get_account_sequence(&self, _public_key: &str) -> Result<i64, HorizonFailure> {
            self.log.lock().push("get_account_sequence".to_string());
            Ok(self.sequence)
        }

        async fn get_latest_ledger_number(&self) -> Result<i32, HorizonFailure> {
            Ok(905)
        }
    }

    struct FakeTracker {
        ledger: i32,
    }

    #[async_trait]
    impl LedgerNumberTracker for FakeTracker {
        async fn get_ledger_number(&self) -> AppResult<i32> {
            Ok(self.ledger)
        }

        async fn get_lock_horizon(&self) -> AppResult<(i32, i32)> {
            Ok((self.ledger, self.ledger + 10))
        }
    }

    #[derive(Default)]
    struct RecordingMonitor {
        outcomes: Mutex<Vec<TxOutcome>>,
    }

    impl MonitorService for RecordingMonitor {
        fn record_tx_outcome(&self, outcome: TxOutcome, _tx: &Transaction, _meta: &TxMetadata) {
            self.outcomes.lock().push(outcome);
        }
    }

    #[derive(Default)]
    struct RecordingCrashTracker {
        reports: Mutex<Vec<String>>,
    }

    impl CrashTracker for RecordingCrashTracker {
        fn report(&self, context: &str, detail: &str) {
            self.reports.lock().push(format!("{}: {}", context, detail));
        }
    }

    struct Harness {
        worker: TransactionWorker,
        bundle: JobBundle,
        store: Arc<FakeStore>,
        horizon: Arc<FakeHorizon>,
        monitor: Arc<RecordingMonitor>,
        crash: Arc<RecordingCrashTracker>,
        limiter: Arc<AdmissionLimiter>,
        log: CallLog,
    }

    fn claimed_row(channel_public: &str) -> Transaction {
        Transaction {
            id: Uuid::new_v4(),
            external_id: "payment-1".to_string(),
            tenant_id: "tenant-1".to_string(),
            kind: TransactionKind::Payment,
            status: TransactionStatus::Processing,
            status_message: None,
            status_history: Json(vec![]),
            asset_code: "XLM".to_string(),
            asset_issuer: None,
            amount: dec!(25.5),
            destination: DESTINATION.to_string(),
            memo: None,
            distribution_account: None,
            channel_account_public_key: Some(channel_public.to_string()),
            attempts_count: 0,
            stellar_transaction_hash: None,
            xdr_sent: None,
            xdr_received: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            started_at: Some(Utc::now()),
            sent_at: None,
            completed_at: None,
            locked_at: Some(Utc::now()),
            locked_until_ledger_number: Some(910),
        }
    }

    fn harness_with(row_edit: impl FnOnce(&mut Transaction)) -> Harness {
        let log: CallLog = Arc::new(Mutex::new(vec![]));
        let signer = Arc::new(TestSigner::new());

        let mut row = claimed_row(&signer.channel_public);
        row_edit(&mut row);

        let channel_account = ChannelAccount {
            public_key: signer.channel_public.clone(),
            encrypted_private_key: "unused".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            locked_at: Some(Utc::now()),
            locked_until_ledger_number: Some(910),
        };

        let store = Arc::new(FakeStore {
            log: log.clone(),
            row: Mutex::new(row.clone()),
            events: Mutex::new(vec![]),
        });
        let horizon = Arc::new(FakeHorizon {
            log: log.clone(),
            sequence: 41,
            submit_result: Mutex::new(None),
            lookup_result: Mutex::new(None),
        });
        let monitor = Arc::new(RecordingMonitor::default());
        let crash = Arc::new(RecordingCrashTracker::default());
        let limiter = Arc::new(AdmissionLimiter::new(50, 8, 10, ChronoDuration::minutes(3)));

        let worker = TransactionWorker::new(
            store.clone(),
            horizon.clone(),
            Arc::new(FakeTracker { ledger: 905 }),
            signer.clone(),
            EnvelopeBuilder::new(PASSPHRASE, 100),
            HandlerRegistry::with_defaults(),
            limiter.clone(),
            RetryPolicy,
            monitor.clone(),
            crash.clone(),
        );

        let bundle = JobBundle {
            transaction: row,
            channel_account,
            locked_until_ledger_number: 910,
        };

        Harness {
            worker,
            bundle,
            store,
            horizon,
            monitor,
            crash,
            limiter,
            log,
        }
    }

    fn harness() -> Harness {
        harness_with(|_| {})
    }

    fn success_response() -> TransactionResponse {
        TransactionResponse {
            id: "abc123".to_string(),
            hash: "abc123".to_string(),
            successful: true,
            ledger: Some(907),
            envelope_xdr: None,
            result_xdr: Some("AAAAresult".to_string()),
            created_at: None,
        }
    }

    fn rejection(transaction: Option<&str>, operations: &[&str], status: Option<u16>) -> HorizonFailure {
        HorizonFailure {
            status_code: status,
            timed_out: false,
            result_codes: ResultCodes {
                transaction: transaction.map(|c| c.to_string()),
                inner_transaction: None,
                operations: operations.iter().map(|c| c.to_string()).collect(),
            },
            problem_type: None,
            title: None,
            detail: None,
            result_xdr: Some("AAAAfailed".to_string()),
        }
    }

    fn position(log: &CallLog, entry: &str) -> usize {
        let entries = log.lock().clone();
        entries
            .iter()
            .position(|l| l == entry)
            .unwrap_or_else(|| panic!("{} not found in call log {:?}", entry, entries))
    }

    #[tokio::test]
    async fn persists_the_hash_before_submitting_and_completes_the_job() {
        let h = harness();
        *h.horizon.submit_result.lock() = Some(Ok(success_response()));

        h.worker.process(h.bundle.clone()).await;

        let reports = h.crash.reports.lock().clone();
        assert!(reports.is_empty(), "{:?}", reports);
        assert!(position(&h.log, "save_hash_and_xdr_sent") < position(&h.log, "submit_transaction"));
        assert!(position(&h.log, "unlock_channel_account") < position(&h.log, "unlock_transaction"));

        let row = h.store.row.lock().clone();
        assert_eq!(row.status, TransactionStatus::Success);
        assert_eq!(row.attempts_count, 1);
        assert!(row.stellar_transaction_hash.is_some());
        assert_eq!(row.xdr_received.as_deref(), Some("AAAAresult"));

        let events = h.store.events.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "payment_completed_success");

        let outcomes = h.monitor.outcomes.lock();
        assert!(outcomes.contains(&TxOutcome::ProcessingStarted));
        assert!(outcomes.contains(&TxOutcome::ProcessingSuccessful));
    }

    #[tokio::test]
    async fn terminal_rejections_mark_the_job_failed_with_an_event() {
        let h = harness();
        *h.horizon.submit_result.lock() =
            Some(Err(rejection(Some("tx_failed"), &["op_underfunded"], Some(400))));

        h.worker.process(h.bundle.clone()).await;

        let reports = h.crash.reports.lock().clone();
        assert_eq!(reports.len(), 1, "{:?}", reports);
        assert!(reports[0].contains("op_underfunded"));
        let row = h.store.row.lock().clone();
        assert_eq!(row.status, TransactionStatus::Error);
        assert!(row.status_message.unwrap().contains("op_underfunded"));
        assert_eq!(row.xdr_received.as_deref(), Some("AAAAfailed"));

        let events = h.store.events.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "payment_completed_error");

        let log = h.log.lock();
        assert!(!log.iter().any(|l| l == "prepare_for_reprocessing"));
        assert!(log.iter().any(|l| l == "unlock_channel_account"));
        assert!(log.iter().any(|l| l == "unlock_transaction"));
    }

    #[tokio::test]
    async fn unready_destinations_fail_with_an_event_too() {
        let h = harness();
        *h.horizon.submit_result.lock() =
            Some(Err(rejection(Some("tx_failed"), &["op_no_trust"], Some(400))));

        h.worker.process(h.bundle.clone()).await;

        assert!(h.crash.reports.lock().is_empty());
        assert_eq!(h.store.row.lock().status, TransactionStatus::Error);
        assert_eq!(h.store.events.lock().len(), 1);
    }

    #[tokio::test]
    async fn indeterminate_rejections_requeue_and_throttle() {
        let h = harness();
        *h.horizon.submit_result.lock() = Some(Err(HorizonFailure {
            status_code: Some(504),
            timed_out: true,
            result_codes: ResultCodes::default(),
            problem_type: None,
            title: None,
            detail: None,
            result_xdr: None,
        }));

        h.worker.process(h.bundle.clone()).await;

        assert!(h.crash.reports.lock().is_empty());
        assert_eq!(h.limiter.current_limit(), 8);

        let row = h.store.row.lock().clone();
        // Status and hash survive so the next claim reconciles this attempt.
        assert_eq!(row.status, TransactionStatus::Processing);
        assert!(row.stellar_transaction_hash.is_some());

        let log = h.log.lock();
        assert!(!log.iter().any(|l| l.starts_with("update_status")));
        assert!(log.iter().any(|l| l == "unlock_channel_account"));
        assert!(log.iter().any(|l| l == "unlock_transaction"));
    }

    #[tokio::test]
    async fn sequence_conflicts_requeue_without_failing_the_job() {
        let h = harness();
        *h.horizon.submit_result.lock() =
            Some(Err(rejection(Some("tx_bad_seq"), &[], Some(400))));

        h.worker.process(h.bundle.clone()).await;

        let reports = h.crash.reports.lock().clone();
        assert_eq!(reports.len(), 1, "{:?}", reports);
        assert!(reports[0].contains("sequence conflict"));
        assert_eq!(h.store.row.lock().status, TransactionStatus::Processing);
        assert!(h.store.events.lock().is_empty());
        assert!(h.log.lock().iter().any(|l| l == "unlock_transaction"));
    }

    #[tokio::test]
    async fn reconciles_a_successful_previous_attempt_without_resubmitting() {
        let h = harness_with(|row| {
            row.stellar_transaction_hash = Some("deadbeef".repeat(8));
        });
        *h.horizon.lookup_result.lock() = Some(Ok(success_response()));

        h.worker.process(h.bundle.clone()).await;

        assert!(h.crash.reports.lock().is_empty());
        let log = h.log.lock().clone();
        assert!(log.iter().any(|l| l == "get_transaction"));
        assert!(!log.iter().any(|l| l == "submit_transaction"));
        assert!(!log.iter().any(|l| l == "save_hash_and_xdr_sent"));

        assert_eq!(h.store.row.lock().status, TransactionStatus::Success);
        assert_eq!(h.store.events.lock().len(), 1);
        assert!(h
            .monitor
            .outcomes
            .lock()
            .contains(&TxOutcome::ReconciliationSuccessful));
    }

    #[tokio::test]
    async fn vanished_submissions_are_reset_for_a_fresh_attempt() {
        let h = harness_with(|row| {
            row.stellar_transaction_hash = Some("deadbeef".repeat(8));
        });
        *h.horizon.lookup_result.lock() = Some(Err(HorizonFailure {
            status_code: Some(404),
            timed_out: false,
            result_codes: ResultCodes::default(),
            problem_type: None,
            title: Some("Resource Missing".to_string()),
            detail: None,
            result_xdr: None,
        }));

        h.worker.process(h.bundle.clone()).await;

        assert!(h.crash.reports.lock().is_empty());
        let row = h.store.row.lock().clone();
        assert_eq!(row.status, TransactionStatus::Pending);
        assert!(row.stellar_transaction_hash.is_none());

        let log = h.log.lock();
        assert!(log.iter().any(|l| l == "prepare_for_reprocessing"));
        assert!(log.iter().any(|l| l == "unlock_channel_account"));
    }

    #[tokio::test]
    async fn on_chain_failures_are_reset_for_a_fresh_attempt() {
        let h = harness_with(|row| {
            row.stellar_transaction_hash = Some("deadbeef".repeat(8));
        });
        let mut failed = success_response();
        failed.successful = false;
        *h.horizon.lookup_result.lock() = Some(Ok(failed));

        h.worker.process(h.bundle.clone()).await;

        assert!(h.crash.reports.lock().is_empty());
        assert_eq!(h.store.row.lock().status, TransactionStatus::Pending);
        assert!(h.log.lock().iter().any(|l| l == "prepare_for_reprocessing"));
    }

    #[tokio::test]
    async fn unknown_reconciliation_outcomes_leave_the_job_locked() {
        let h = harness_with(|row| {
            row.stellar_transaction_hash = Some("deadbeef".repeat(8));
        });
        *h.horizon.lookup_result.lock() = Some(Err(HorizonFailure {
            status_code: Some(500),
            timed_out: false,
            result_codes: ResultCodes::default(),
            problem_type: None,
            title: None,
            detail: Some("internal error".to_string()),
            result_xdr: None,
        }));

        h.worker.process(h.bundle.clone()).await;

        assert_eq!(h.crash.reports.lock().len(), 1);
        let log = h.log.lock();
        assert!(!log.iter().any(|l| l == "prepare_for_reprocessing"));
        assert!(!log.iter().any(|l| l == "unlock_transaction"));
        assert!(!log.iter().any(|l| l == "unlock_channel_account"));
        assert!(h
            .monitor
            .outcomes
            .lock()
            .contains(&TxOutcome::ReconciliationFailure));
    }

    #[tokio::test]
    async fn lapsed_claims_are_skipped_entirely() {
        // Lock expired at ledger 900; the tracker reports 905.
        let h = harness_with(|row| {
            row.locked_until_ledger_number = Some(900);
        });

        h.worker.process(h.bundle.clone()).await;

        assert!(h.crash.reports.lock().is_empty());
        assert!(h.log.lock().is_empty());
    }

    #[tokio::test]
    async fn invalid_payment_fields_fail_before_any_network_call() {
        let h = harness_with(|row| {
            row.amount = dec!(-5);
        });

        h.worker.process(h.bundle.clone()).await;

        // An unsubmittable row is an operator problem, not a Horizon one.
        assert_eq!(h.crash.reports.lock().len(), 1);
        assert_eq!(h.store.row.lock().status, TransactionStatus::Error);
        assert_eq!(h.store.events.lock().len(), 1);

        let log = h.log.lock();
        assert!(!log
            .iter()
            .any(|l| l == "get_account_sequence" || l == "submit_transaction"));
    }

    #[tokio::test]
    async fn an_accepted_but_unflagged_response_is_an_infrastructure_error() {
        let h = harness();
        let mut unflagged = success_response();
        unflagged.successful = false;
        *h.horizon.submit_result.lock() = Some(Ok(unflagged));

        h.worker.process(h.bundle.clone()).await;

        assert_eq!(h.crash.reports.lock().len(), 1);
        let row = h.store.row.lock().clone();
        // Job keeps its hash and lock; the next cycle reconciles it.
        assert_eq!(row.status, TransactionStatus::Processing);
        assert!(row.stellar_transaction_hash.is_some());
        assert!(!h.log.lock().iter().any(|l| l == "unlock_transaction"));
    }
}
