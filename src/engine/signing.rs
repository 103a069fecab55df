use async_trait::async_trait;
use stellar_sdk::Keypair;
use stellar_xdr::curr::{DecoratedSignature, Signature, SignatureHint};

use crate::engine::seed_crypto::SeedEncrypter;
use crate::engine::strkey;
use crate::error::{AppError, AppResult, SigningError};
use crate::store::channel_accounts::ChannelAccountRepository;

/// Produces decorated signatures for envelope hashes without ever handing the
/// raw keys to callers.
#[async_trait]
pub trait SignatureService: Send + Sync {
    fn distribution_public_key(&self) -> &str;

    async fn sign_with_distribution(&self, payload: &[u8; 32]) -> AppResult<DecoratedSignature>;

    async fn sign_with_channel_account(
        &self,
        public_key: &str,
        payload: &[u8; 32],
    ) -> AppResult<DecoratedSignature>;
}

/// Wraps a raw ed25519 signature with the signer's four-byte key hint, which
/// is the last four bytes of the public key.
pub fn decorated_signature(public_key: &str, raw: Vec<u8>) -> AppResult<DecoratedSignature> {
    let decoded = strkey::decode_ed25519_public_key(public_key)?;
    let mut hint = [0u8; 4];
    hint.copy_from_slice(&decoded[28..32]);

    Ok(DecoratedSignature {
        hint: SignatureHint(hint),
        signature: Signature(raw.try_into()?),
    })
}

fn keypair_from_seed(seed: &str) -> AppResult<Keypair> {
    Keypair::from_secret_key(seed)
        .map_err(|e| AppError::Signing(SigningError::Keypair(format!("{:?}", e))))
}

/// Signs with the distribution account from config and with channel accounts
/// whose seeds are decrypted on demand from the pool table.
pub struct StellarSignatureService {
    distribution: Keypair,
    distribution_public_key: String,
    channel_accounts: ChannelAccountRepository,
    encrypter: SeedEncrypter,
}

impl StellarSignatureService {
    pub fn new(
        distribution_seed: &str,
        channel_accounts: ChannelAccountRepository,
        encrypter: SeedEncrypter,
    ) -> AppResult<Self> {
        let distribution = keypair_from_seed(distribution_seed)?;
        let distribution_public_key = distribution.public_key();
        Ok(Self {
            distribution,
            distribution_public_key,
            channel_accounts,
            encrypter,
        })
    }

    fn sign_payload(
        keypair: &Keypair,
        public_key: &str,
        payload: &[u8; 32],
    ) -> AppResult<DecoratedSignature> {
        let raw = keypair
            .sign(payload)
            .map_err(|e| SigningError::Keypair(format!("{:?}", e)))?;
        decorated_signature(public_key, raw.to_vec())
    }
}

#[async_trait]
impl SignatureService for StellarSignatureService {
    fn distribution_public_key(&self) -> &str {
        &self.distribution_public_key
    }

    async fn sign_with_distribution(&self, payload: &[u8; 32]) -> AppResult<DecoratedSignature> {
        Self::sign_payload(&self.distribution, &self.distribution_public_key, payload)
    }

    async fn sign_with_channel_account(
        &self,
        public_key: &str,
        payload: &[u8; 32],
    ) -> AppResult<DecoratedSignature> {
        let account = self.channel_accounts.get(public_key).await?;
        let seed = self.encrypter.decrypt(&account.encrypted_private_key)?;
        let keypair = keypair_from_seed(&strkey::encode_secret_seed(&seed))?;
        Self::sign_payload(&keypair, public_key, payload)
    }
}
