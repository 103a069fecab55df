pub mod classify;
pub mod client;

pub use classify::{ErrorClass, HorizonFailure};
pub use client::{HorizonClient, ReqwestHorizonClient, TransactionResponse};
