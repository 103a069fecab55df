use stellar_xdr::curr::{Operation, OperationBody, PaymentOp};

use crate::error::AppResult;
use crate::store::models::{Transaction, TransactionKind};
use crate::submitter::handlers::{amount_stroops, asset_for, muxed_account, TransactionHandler};

/// Standard disbursement payment. The channel account sources the envelope
/// and the distribution account pays the network fee through a fee bump.
pub struct PaymentHandler;

impl TransactionHandler for PaymentHandler {
    fn kind(&self) -> TransactionKind {
        TransactionKind::Payment
    }

    fn wraps_fee_bump(&self) -> bool {
        true
    }

    fn operations(
        &self,
        tx: &Transaction,
        distribution_account: &str,
    ) -> AppResult<Vec<Operation>> {
        Ok(vec![payment_operation(tx, distribution_account)?])
    }
}

/// Payment submitted without the fee-bump wrapper; the channel account pays
/// the network fee out of its own balance.
pub struct DirectPaymentHandler;

impl TransactionHandler for DirectPaymentHandler {
    fn kind(&self) -> TransactionKind {
        TransactionKind::DirectPayment
    }

    fn wraps_fee_bump(&self) -> bool {
        false
    }

    fn operations(
        &self,
        tx: &Transaction,
        distribution_account: &str,
    ) -> AppResult<Vec<Operation>> {
        Ok(vec![payment_operation(tx, distribution_account)?])
    }
}

/// The funds always move from the distribution account, so the operation
/// pins it as source no matter which account sources the envelope.
fn payment_operation(tx: &Transaction, distribution_account: &str) -> AppResult<Operation> {
    Ok(Operation {
        source_account: Some(muxed_account(distribution_account)?),
        body: OperationBody::Payment(PaymentOp {
            destination: muxed_account(&tx.destination)?,
            asset: asset_for(tx)?,
            amount: amount_stroops(tx.amount)?,
        }),
    })
}
