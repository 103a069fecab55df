use std::sync::Arc;

use base64::Engine;
use chrono::Utc;
use rand::RngCore;
use sha2::{Digest, Sha256};
use stellar_sdk::Keypair;
use stellar_xdr::curr::{
    Asset, BeginSponsoringFutureReservesOp, CreateAccountOp, Hash, LedgerKey, LedgerKeyAccount,
    Limits, Memo, Operation, OperationBody, PaymentOp, Preconditions, RevokeSponsorshipOp,
    SequenceNumber, TimeBounds, TimePoint, Transaction as XdrTransaction, TransactionEnvelope,
    TransactionExt, TransactionSignaturePayload, TransactionSignaturePayloadTaggedTransaction,
    TransactionV1Envelope, WriteXdr,
};
use tracing::{info, warn};

use crate::engine::ledger_tracker::LedgerNumberTracker;
use crate::engine::seed_crypto::SeedEncrypter;
use crate::engine::signing::SignatureService;
use crate::engine::strkey;
use crate::error::{AppError, AppResult};
use crate::horizon::HorizonClient;
use crate::store::channel_accounts::ChannelAccountRepository;
use crate::store::models::{ChannelAccount, NewChannelAccount};
use crate::submitter::handlers::{account_id, muxed_account};

/// A creation or deletion batch needs one signature per account plus the
/// distribution account's, and an envelope carries at most twenty.
pub const MAX_ACCOUNTS_PER_BATCH: usize = 19;

// Provisioning envelopes are short-lived; nothing retries them blind.
const BATCH_TIMEOUT_SECS: u64 = 15;

/// Once its sponsorship is revoked an account must hold its own base
/// reserve, so each deletion pre-funds 1.5 XLM that the merge claws back.
const REVOKE_RESERVE_STROOPS: i64 = 15_000_000;

/// Grows and shrinks the channel account pool to the configured size.
///
/// New accounts are persisted encrypted before their creation is submitted;
/// a failed submission rolls the rows back, a crashed one leaves rows that
/// are visibly locked until an operator reconciles them.
pub struct ChannelAccountService {
    repository: ChannelAccountRepository,
    horizon: Arc<dyn HorizonClient>,
    ledger_tracker: Arc<dyn LedgerNumberTracker>,
    signer: Arc<dyn SignatureService>,
    encrypter: SeedEncrypter,
    network_id: Hash,
    max_base_fee: u32,
}

impl ChannelAccountService {
    pub fn new(
        repository: ChannelAccountRepository,
        horizon: Arc<dyn HorizonClient>,
        ledger_tracker: Arc<dyn LedgerNumberTracker>,
        signer: Arc<dyn SignatureService>,
        encrypter: SeedEncrypter,
        network_passphrase: &str,
        max_base_fee: u32,
    ) -> Self {
        Self {
            repository,
            horizon,
            ledger_tracker,
            signer,
            encrypter,
            network_id: Hash(Sha256::digest(network_passphrase.as_bytes()).into()),
            max_base_fee,
        }
    }

    /// Brings the on-database pool to exactly `desired` accounts.
    pub async fn ensure_count(&self, desired: usize) -> AppResult<()> {
        let current = self.repository.count().await? as usize;
        info!(current, desired, "🏦 Checking channel account pool");

        if current < desired {
            self.create_accounts(desired - current).await
        } else if current > desired {
            self.delete_accounts(current - desired).await
        } else {
            Ok(())
        }
    }

    async fn create_accounts(&self, count: usize) -> AppResult<()> {
        let mut remaining = count;
        while remaining > 0 {
            let batch = remaining.min(MAX_ACCOUNTS_PER_BATCH);
            self.create_batch(batch).await?;
            remaining -= batch;
        }
        info!(count, "✅ Channel accounts created");
        Ok(())
    }

    async fn create_batch(&self, count: usize) -> AppResult<()> {
        let mut new_accounts = Vec::with_capacity(count);
        for _ in 0..count {
            let mut seed = [0u8; 32];
            rand::rng().fill_bytes(&mut seed);

            let keypair = Keypair::from_secret_key(&strkey::encode_secret_seed(&seed))?;
            new_accounts.push(NewChannelAccount {
                public_key: keypair.public_key(),
                encrypted_private_key: self.encrypter.encrypt(&seed)?,
            });
        }

        // Rows land encrypted and locked before anything touches the
        // network; the signer reads these rows to co-sign the envelope.
        let (current_ledger, lock_to_ledger) = self.ledger_tracker.get_lock_horizon().await?;
        self.repository
            .insert_and_lock(&new_accounts, current_ledger, lock_to_ledger)
            .await?;

        let operations = sponsored_creation_ops(&new_accounts)?;
        let signers: Vec<String> = new_accounts.iter().map(|a| a.public_key.clone()).collect();

        if let Err(e) = self.submit_batch(operations, &signers).await {
            for account in &new_accounts {
                if let Err(cleanup) = self.repository.delete(&account.public_key).await {
                    warn!(
                        public_key = %account.public_key,
                        "Failed to roll back channel account row: {}", cleanup
                    );
                }
            }
            return Err(e);
        }

        for account in &new_accounts {
            self.repository.unlock(&account.public_key).await?;
        }
        info!(batch = count, "🏦 Channel account batch created on chain");
        Ok(())
    }

    async fn delete_accounts(&self, count: usize) -> AppResult<()> {
        let mut remaining = count;
        while remaining > 0 {
            let batch = remaining.min(MAX_ACCOUNTS_PER_BATCH);
            let deleted = self.delete_batch(batch).await?;
            if deleted == 0 {
                warn!(remaining, "No free channel accounts left to delete");
                break;
            }
            remaining -= deleted;
        }
        Ok(())
    }

    async fn delete_batch(&self, count: usize) -> AppResult<usize> {
        let (current_ledger, lock_to_ledger) = self.ledger_tracker.get_lock_horizon().await?;
        let accounts = self
            .repository
            .get_and_lock_all(current_ledger, lock_to_ledger, count)
            .await?;
        if accounts.is_empty() {
            return Ok(0);
        }

        let distribution = self.signer.distribution_public_key().to_string();
        let operations = deletion_ops(&accounts, &distribution)?;
        let signers: Vec<String> = accounts.iter().map(|a| a.public_key.clone()).collect();

        if let Err(e) = self.submit_batch(operations, &signers).await {
            for account in &accounts {
                if let Err(unlock) = self.repository.unlock(&account.public_key).await {
                    warn!(
                        public_key = %account.public_key,
                        "Failed to unlock channel account after merge failure: {}", unlock
                    );
                }
            }
            return Err(e);
        }

        for account in &accounts {
            self.repository.delete(&account.public_key).await?;
        }
        info!(batch = accounts.len(), "🗑️ Channel account batch merged away");
        Ok(accounts.len())
    }

    async fn submit_batch(
        &self,
        operations: Vec<Operation>,
        signing_accounts: &[String],
    ) -> AppResult<()> {
        let distribution = self.signer.distribution_public_key().to_string();
        let sequence = self
            .horizon
            .get_account_sequence(&distribution)
            .await
            .map_err(AppError::from)?;

        let op_count = operations.len() as u32;
        let tx = XdrTransaction {
            source_account: muxed_account(&distribution)?,
            fee: self.max_base_fee * op_count,
            seq_num: SequenceNumber(sequence + 1),
            cond: Preconditions::Time(TimeBounds {
                min_time: TimePoint(0),
                max_time: TimePoint(Utc::now().timestamp() as u64 + BATCH_TIMEOUT_SECS),
            }),
            memo: Memo::None,
            operations: operations.try_into()?,
            ext: TransactionExt::V0,
        };

        let payload = TransactionSignaturePayload {
            network_id: self.network_id.clone(),
            tagged_transaction: TransactionSignaturePayloadTaggedTransaction::Tx(tx.clone()),
        };
        let hash: [u8; 32] = Sha256::digest(payload.to_xdr(Limits::none())?).into();

        let mut signatures = vec![self.signer.sign_with_distribution(&hash).await?];
        for public_key in signing_accounts {
            signatures.push(
                self.signer
                    .sign_with_channel_account(public_key, &hash)
                    .await?,
            );
        }

        let envelope = TransactionEnvelope::Tx(TransactionV1Envelope {
            tx,
            signatures: signatures.try_into()?,
        });
        let xdr_bytes = envelope.to_xdr(Limits::none())?;
        let response = self
            .horizon
            .submit_transaction(&base64::engine::general_purpose::STANDARD.encode(&xdr_bytes))
            .await
            .map_err(AppError::from)?;

        if !response.successful {
            return Err(AppError::Horizon(format!(
                "channel account batch {} accepted but not flagged successful",
                response.hash
            )));
        }
        Ok(())
    }
}

/// Begin-sponsoring, create, end-sponsoring triple per account: the
/// distribution account sponsors the reserves, so new accounts start with a
/// zero balance. The end operation is sourced by the new account, which is
/// why it must co-sign the envelope; the other two fall through to the
/// envelope source.
fn sponsored_creation_ops(new_accounts: &[NewChannelAccount]) -> AppResult<Vec<Operation>> {
    let mut operations = Vec::with_capacity(new_accounts.len() * 3);
    for account in new_accounts {
        operations.push(Operation {
            source_account: None,
            body: OperationBody::BeginSponsoringFutureReserves(BeginSponsoringFutureReservesOp {
                sponsored_id: account_id(&account.public_key)?,
            }),
        });
        operations.push(Operation {
            source_account: None,
            body: OperationBody::CreateAccount(CreateAccountOp {
                destination: account_id(&account.public_key)?,
                starting_balance: 0,
            }),
        });
        operations.push(Operation {
            source_account: Some(muxed_account(&account.public_key)?),
            body: OperationBody::EndSponsoringFutureReserves,
        });
    }
    Ok(operations)
}

/// Reserve payment, sponsorship revocation, account merge - per account.
/// The distribution account authorizes the first two; the merge is sourced
/// by the account being folded back, which is why it co-signs.
fn deletion_ops(
    accounts: &[ChannelAccount],
    distribution_account: &str,
) -> AppResult<Vec<Operation>> {
    let mut operations = Vec::with_capacity(accounts.len() * 3);
    for account in accounts {
        operations.push(Operation {
            source_account: None,
            body: OperationBody::Payment(PaymentOp {
                destination: muxed_account(&account.public_key)?,
                asset: Asset::Native,
                amount: REVOKE_RESERVE_STROOPS,
            }),
        });
        operations.push(Operation {
            source_account: None,
            body: OperationBody::RevokeSponsorship(RevokeSponsorshipOp::LedgerEntry(
                LedgerKey::Account(LedgerKeyAccount {
                    account_id: account_id(&account.public_key)?,
                }),
            )),
        });
        operations.push(Operation {
            source_account: Some(muxed_account(&account.public_key)?),
            body: OperationBody::AccountMerge(muxed_account(distribution_account)?),
        });
    }
    Ok(operations)
}
