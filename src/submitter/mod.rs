pub mod builder;
pub mod handlers;
pub mod payment;
pub mod scheduler;
pub mod worker;

pub use builder::{EnvelopeBuilder, PreparedEnvelope};
pub use handlers::{HandlerRegistry, TransactionHandler};
pub use payment::{DirectPaymentHandler, PaymentHandler};
pub use scheduler::SubmissionScheduler;
pub use worker::TransactionWorker;
