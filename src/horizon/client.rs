use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use super::classify::{HorizonFailure, HorizonProblem, ResultCodes};
use crate::error::AppResult;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A transaction as returned by Horizon's transaction endpoints.
///
/// `successful` defaults to false so a response that never states success
/// is treated as a failure rather than trusted.
#[derive(Debug, Clone, Deserialize)]
pub struct TransactionResponse {
    pub id: String,
    pub hash: String,
    #[serde(default)]
    pub successful: bool,
    #[serde(default)]
    pub ledger: Option<i64>,
    #[serde(default)]
    pub envelope_xdr: Option<String>,
    #[serde(default)]
    pub result_xdr: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    sequence: String,
}

#[derive(Debug, Deserialize)]
struct LedgerPage {
    #[serde(rename = "_embedded")]
    embedded: LedgerRecords,
}

#[derive(Debug, Deserialize)]
struct LedgerRecords {
    records: Vec<LedgerRecord>,
}

#[derive(Debug, Deserialize)]
struct LedgerRecord {
    sequence: i32,
}

/// The network boundary. Slow, and ambiguous on failure: a timed-out submit
/// may still have landed, which is why all errors come back as a
/// [`HorizonFailure`] for classification instead of a flattened string.
#[async_trait]
pub trait HorizonClient: Send + Sync {
    async fn submit_transaction(
        &self,
        envelope_xdr: &str,
    ) -> Result<TransactionResponse, HorizonFailure>;

    async fn get_transaction(&self, hash: &str) -> Result<TransactionResponse, HorizonFailure>;

    async fn get_account_sequence(&self, public_key: &str) -> Result<i64, HorizonFailure>;

    async fn get_latest_ledger_number(&self) -> Result<i32, HorizonFailure>;
}

pub struct ReqwestHorizonClient {
    client: Client,
    base_url: String,
}

impl ReqwestHorizonClient {
    pub fn new(base_url: &str) -> AppResult<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn parse_problem(response: reqwest::Response) -> HorizonFailure {
        let status = response.status().as_u16();
        match response.json::<HorizonProblem>().await {
            Ok(problem) => HorizonFailure::from_problem(status, problem),
            Err(_) => HorizonFailure::from_problem(status, HorizonProblem::default()),
        }
    }

    fn malformed(detail: String) -> HorizonFailure {
        HorizonFailure {
            status_code: None,
            timed_out: false,
            result_codes: ResultCodes::default(),
            problem_type: None,
            title: None,
            detail: Some(detail),
            result_xdr: None,
        }
    }
}

#[async_trait]
impl HorizonClient for ReqwestHorizonClient {
    async fn submit_transaction(
        &self,
        envelope_xdr: &str,
    ) -> Result<TransactionResponse, HorizonFailure> {
        let response = self
            .client
            .post(format!("{}/transactions", self.base_url))
            .form(&[("tx", envelope_xdr)])
            .send()
            .await
            .map_err(|e| HorizonFailure::from_transport(&e))?;

        if response.status().is_success() {
            response
                .json::<TransactionResponse>()
                .await
                .map_err(|e| HorizonFailure::from_transport(&e))
        } else {
            Err(Self::parse_problem(response).await)
        }
    }

    async fn get_transaction(&self, hash: &str) -> Result<TransactionResponse, HorizonFailure> {
        let response = self
            .client
            .get(format!("{}/transactions/{}", self.base_url, hash))
            .send()
            .await
            .map_err(|e| HorizonFailure::from_transport(&e))?;

        if response.status().is_success() {
            response
                .json::<TransactionResponse>()
                .await
                .map_err(|e| HorizonFailure::from_transport(&e))
        } else {
            Err(Self::parse_problem(response).await)
        }
    }

    async fn get_account_sequence(&self, public_key: &str) -> Result<i64, HorizonFailure> {
        let response = self
            .client
            .get(format!("{}/accounts/{}", self.base_url, public_key))
            .send()
            .await
            .map_err(|e| HorizonFailure::from_transport(&e))?;

        if !response.status().is_success() {
            return Err(Self::parse_problem(response).await);
        }

        let account = response
            .json::<AccountResponse>()
            .await
            .map_err(|e| HorizonFailure::from_transport(&e))?;

        account.sequence.parse::<i64>().map_err(|_| {
            Self::malformed(format!(
                "account {} returned a non-numeric sequence: {}",
                public_key, account.sequence
            ))
        })
    }

    async fn get_latest_ledger_number(&self) -> Result<i32, HorizonFailure> {
        let response = self
            .client
            .get(format!("{}/ledgers?order=desc&limit=1", self.base_url))
            .send()
            .await
            .map_err(|e| HorizonFailure::from_transport(&e))?;

        if !response.status().is_success() {
            return Err(Self::parse_problem(response).await);
        }

        let page = response
            .json::<LedgerPage>()
            .await
            .map_err(|e| HorizonFailure::from_transport(&e))?;

        page.embedded
            .records
            .first()
            .map(|record| record.sequence)
            .ok_or_else(|| Self::malformed("ledger page came back empty".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_response_defaults_successful_to_false() {
        let body = r#"{"id": "abc", "hash": "abc", "ledger": 123}"#;
        let response: TransactionResponse = serde_json::from_str(body).unwrap();
        assert!(!response.successful);

        let body = r#"{"id": "abc", "hash": "abc", "successful": true, "result_xdr": "AAAA"}"#;
        let response: TransactionResponse = serde_json::from_str(body).unwrap();
        assert!(response.successful);
        assert_eq!(response.result_xdr.as_deref(), Some("AAAA"));
    }

    #[test]
    fn account_sequence_is_a_string_in_horizon_json() {
        let body = r#"{"sequence": "181053245243654145"}"#;
        let account: AccountResponse = serde_json::from_str(body).unwrap();
        assert_eq!(account.sequence.parse::<i64>().unwrap(), 181053245243654145);
    }

    #[test]
    fn ledger_page_parses_embedded_records() {
        let body = r#"{"_embedded": {"records": [{"sequence": 53248715}]}}"#;
        let page: LedgerPage = serde_json::from_str(body).unwrap();
        assert_eq!(page.embedded.records[0].sequence, 53248715);
    }
}
