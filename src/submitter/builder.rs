use base64::Engine;
use chrono::Utc;
use sha2::{Digest, Sha256};
use stellar_xdr::curr::{
    Duration as XdrDuration, FeeBumpTransaction, FeeBumpTransactionEnvelope,
    FeeBumpTransactionExt, FeeBumpTransactionInnerTx, Hash, LedgerBounds, Limits, Preconditions,
    PreconditionsV2, SequenceNumber, TimeBounds, TimePoint, Transaction as XdrTransaction,
    TransactionEnvelope, TransactionExt, TransactionSignaturePayload,
    TransactionSignaturePayloadTaggedTransaction, TransactionV1Envelope, VecM, WriteXdr,
};

use crate::engine::signing::SignatureService;
use crate::error::{AppError, AppResult};
use crate::store::models::Transaction;
use crate::submitter::handlers::{muxed_account, TransactionHandler};

/// Seconds a signed envelope stays valid after building.
const ENVELOPE_TIMEOUT_SECS: u64 = 300;

/// A signed envelope ready for the wire, with the network hash used to find
/// it again during reconciliation.
#[derive(Debug, Clone)]
pub struct PreparedEnvelope {
    pub hash_hex: String,
    pub envelope_xdr: String,
}

/// Assembles and signs envelopes for one Stellar network.
pub struct EnvelopeBuilder {
    network_id: Hash,
    max_base_fee: u32,
}

impl EnvelopeBuilder {
    pub fn new(network_passphrase: &str, max_base_fee: u32) -> Self {
        Self {
            network_id: Hash(Sha256::digest(network_passphrase.as_bytes()).into()),
            max_base_fee,
        }
    }

    /// Builds the envelope for a claimed job and collects every required
    /// signature. `sequence` is the channel account's current sequence as
    /// reported by Horizon; `max_ledger` caps validity at the job's lock
    /// expiry so an envelope can never land after its claim lapsed.
    pub async fn build_and_sign(
        &self,
        job: &Transaction,
        channel_account: &str,
        sequence: i64,
        max_ledger: i32,
        handler: &dyn TransactionHandler,
        signer: &dyn SignatureService,
    ) -> AppResult<PreparedEnvelope> {
        let distribution_account = signer.distribution_public_key().to_string();
        let operations = handler.operations(job, &distribution_account)?;
        if operations.is_empty() {
            return Err(AppError::Internal(
                "handler produced no operations".to_string(),
            ));
        }
        let op_count = operations.len() as u32;

        let max_time = Utc::now().timestamp() as u64 + ENVELOPE_TIMEOUT_SECS;
        let cond = Preconditions::V2(PreconditionsV2 {
            time_bounds: Some(TimeBounds {
                min_time: TimePoint(0),
                max_time: TimePoint(max_time),
            }),
            ledger_bounds: Some(LedgerBounds {
                min_ledger: 0,
                max_ledger: max_ledger.max(0) as u32,
            }),
            min_seq_num: None,
            min_seq_age: XdrDuration(0),
            min_seq_ledger_gap: 0,
            extra_signers: VecM::default(),
        });

        let inner_tx = XdrTransaction {
            source_account: muxed_account(channel_account)?,
            fee: self.max_base_fee * op_count,
            seq_num: SequenceNumber(sequence + 1),
            cond,
            memo: handler.memo(job)?,
            operations: operations.try_into()?,
            ext: TransactionExt::V0,
        };

        // The operation source is the distribution account, so the inner
        // envelope needs its signature alongside the channel account's.
        let inner_hash = self.signature_payload_hash(
            TransactionSignaturePayloadTaggedTransaction::Tx(inner_tx.clone()),
        )?;
        let channel_signature = signer
            .sign_with_channel_account(channel_account, &inner_hash)
            .await?;
        let distribution_signature = signer.sign_with_distribution(&inner_hash).await?;

        let inner_envelope = TransactionV1Envelope {
            tx: inner_tx,
            signatures: vec![channel_signature, distribution_signature].try_into()?,
        };

        if !handler.wraps_fee_bump() {
            let xdr_bytes = TransactionEnvelope::Tx(inner_envelope).to_xdr(Limits::none())?;
            return Ok(PreparedEnvelope {
                hash_hex: hex::encode(inner_hash),
                envelope_xdr: base64::engine::general_purpose::STANDARD.encode(&xdr_bytes),
            });
        }

        // The fee-bump fee covers the wrapper plus every inner operation.
        let fee_bump = FeeBumpTransaction {
            fee_source: muxed_account(&distribution_account)?,
            fee: i64::from(self.max_base_fee) * (i64::from(op_count) + 1),
            inner_tx: FeeBumpTransactionInnerTx::Tx(inner_envelope),
            ext: FeeBumpTransactionExt::V0,
        };

        let outer_hash = self.signature_payload_hash(
            TransactionSignaturePayloadTaggedTransaction::TxFeeBump(fee_bump.clone()),
        )?;
        let outer_signature = signer.sign_with_distribution(&outer_hash).await?;

        let envelope = TransactionEnvelope::TxFeeBump(FeeBumpTransactionEnvelope {
            tx: fee_bump,
            signatures: vec![outer_signature].try_into()?,
        });

        let xdr_bytes = envelope.to_xdr(Limits::none())?;
        Ok(PreparedEnvelope {
            hash_hex: hex::encode(outer_hash),
            envelope_xdr: base64::engine::general_purpose::STANDARD.encode(&xdr_bytes),
        })
    }

    fn signature_payload_hash(
        &self,
        tagged_transaction: TransactionSignaturePayloadTaggedTransaction,
    ) -> AppResult<[u8; 32]> {
        let payload = TransactionSignaturePayload {
            network_id: self.network_id.clone(),
            tagged_transaction,
        };
        Ok(Sha256::digest(payload.to_xdr(Limits::none())?).into())
    }
}
