use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use stellar_xdr::curr::{
    AccountId, AlphaNum12, AlphaNum4, Asset, AssetCode12, AssetCode4, Memo, MuxedAccount,
    Operation, PublicKey, Uint256,
};

use crate::engine::strkey;
use crate::error::{AppError, AppResult};
use crate::store::models::{Transaction, TransactionKind};
use crate::submitter::payment::{DirectPaymentHandler, PaymentHandler};

pub const STROOPS_PER_UNIT: i64 = 10_000_000;

/// Builds the operations and memo for one queue kind. The envelope builder
/// turns the outputs into a signed envelope.
pub trait TransactionHandler: Send + Sync {
    fn kind(&self) -> TransactionKind;

    /// Whether the signed envelope is wrapped in a fee bump paid by the
    /// distribution account.
    fn wraps_fee_bump(&self) -> bool;

    fn operations(&self, tx: &Transaction, distribution_account: &str)
        -> AppResult<Vec<Operation>>;

    fn memo(&self, tx: &Transaction) -> AppResult<Memo> {
        match tx.memo.as_deref() {
            Some(text) if !text.is_empty() => Ok(Memo::Text(text.to_string().try_into()?)),
            _ => Ok(Memo::None),
        }
    }
}

/// Handlers keyed by queue kind.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<TransactionKind, Arc<dyn TransactionHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registry with every production handler wired in.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(PaymentHandler));
        registry.register(Arc::new(DirectPaymentHandler));
        registry
    }

    pub fn register(&mut self, handler: Arc<dyn TransactionHandler>) {
        self.handlers.insert(handler.kind(), handler);
    }

    pub fn get(&self, kind: TransactionKind) -> AppResult<Arc<dyn TransactionHandler>> {
        self.handlers
            .get(&kind)
            .cloned()
            .ok_or_else(|| AppError::Internal(format!("no handler registered for kind {}", kind)))
    }
}

// ========== XDR MAPPING HELPERS ==========

pub fn muxed_account(public_key: &str) -> AppResult<MuxedAccount> {
    Ok(MuxedAccount::Ed25519(Uint256(
        strkey::decode_ed25519_public_key(public_key)?,
    )))
}

pub fn account_id(public_key: &str) -> AppResult<AccountId> {
    Ok(AccountId(PublicKey::PublicKeyTypeEd25519(Uint256(
        strkey::decode_ed25519_public_key(public_key)?,
    ))))
}

pub fn asset_for(tx: &Transaction) -> AppResult<Asset> {
    if tx.asset_is_native() {
        return Ok(Asset::Native);
    }

    let issuer = account_id(tx.asset_issuer.as_deref().unwrap_or_default())?;
    let code = tx.asset_code.as_bytes();
    match code.len() {
        1..=4 => {
            let mut bytes = [0u8; 4];
            bytes[..code.len()].copy_from_slice(code);
            Ok(Asset::CreditAlphanum4(AlphaNum4 {
                asset_code: AssetCode4(bytes),
                issuer,
            }))
        }
        5..=12 => {
            let mut bytes = [0u8; 12];
            bytes[..code.len()].copy_from_slice(code);
            Ok(Asset::CreditAlphanum12(AlphaNum12 {
                asset_code: AssetCode12(bytes),
                issuer,
            }))
        }
        _ => Err(AppError::InvalidInput(format!(
            "asset code {} does not fit an alphanum asset",
            tx.asset_code
        ))),
    }
}

/// Converts a decimal asset amount into stroops, the seven-decimal integer
/// unit the network settles in.
pub fn amount_stroops(amount: Decimal) -> AppResult<i64> {
    let scaled = amount
        .checked_mul(Decimal::from(STROOPS_PER_UNIT))
        .ok_or_else(|| AppError::InvalidInput("amount is out of range".to_string()))?;

    if scaled.fract() != Decimal::ZERO {
        return Err(AppError::InvalidInput(
            "amount has more than seven decimal places".to_string(),
        ));
    }

    scaled
        .to_i64()
        .ok_or_else(|| AppError::InvalidInput("amount is out of range".to_string()))
}
