use aes::cipher::{KeyIvInit, StreamCipher};
use rand::RngCore;
use scrypt::{scrypt, Params as ScryptParams};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::SigningError;

type Aes128Ctr = ctr::Ctr64BE<aes::Aes128>;

const SCRYPT_LOG_N: u8 = 14;
const SCRYPT_R: u32 = 8;
const SCRYPT_P: u32 = 1;
const DERIVED_KEY_LEN: usize = 32;

/// Encrypted channel account seed as stored in the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedSeed {
    pub salt: String,
    pub iv: String,
    pub ciphertext: String,
    pub mac: String,
}

/// Encrypts raw ed25519 seeds with the pool-wide passphrase.
///
/// scrypt derives 32 bytes from the passphrase: the first half keys
/// AES-128-CTR, the second half keys a Sha256 MAC over the ciphertext so a
/// wrong passphrase is detected before a garbage seed ever signs anything.
#[derive(Clone)]
pub struct SeedEncrypter {
    passphrase: String,
}

impl SeedEncrypter {
    pub fn new(passphrase: &str) -> Self {
        Self {
            passphrase: passphrase.to_string(),
        }
    }

    pub fn encrypt(&self, seed: &[u8; 32]) -> Result<String, SigningError> {
        let mut salt = [0u8; 32];
        let mut iv = [0u8; 16];
        rand::rng().fill_bytes(&mut salt);
        rand::rng().fill_bytes(&mut iv);

        let derived = self.derive_key(&salt)?;
        let (aes_key, mac_key) = derived.split_at(16);

        let mut ciphertext = seed.to_vec();
        let mut cipher = Aes128Ctr::new(aes_key.into(), iv.as_slice().into());
        cipher.apply_keystream(&mut ciphertext);

        let record = EncryptedSeed {
            salt: hex::encode(salt),
            iv: hex::encode(iv),
            ciphertext: hex::encode(&ciphertext),
            mac: hex::encode(Self::mac(mac_key, &ciphertext)),
        };

        serde_json::to_string(&record)
            .map_err(|e| SigningError::SeedEncryption(format!("serializing seed record: {}", e)))
    }

    pub fn decrypt(&self, stored: &str) -> Result<[u8; 32], SigningError> {
        let record: EncryptedSeed = serde_json::from_str(stored)
            .map_err(|e| SigningError::SeedEncryption(format!("parsing seed record: {}", e)))?;

        let salt = decode_hex_field("salt", &record.salt)?;
        let iv = decode_hex_field("iv", &record.iv)?;
        let ciphertext = decode_hex_field("ciphertext", &record.ciphertext)?;
        let expected_mac = decode_hex_field("mac", &record.mac)?;

        if iv.len() != 16 {
            return Err(SigningError::SeedEncryption(format!(
                "iv must have 16 bytes, got {}",
                iv.len()
            )));
        }

        let derived = self.derive_key(&salt)?;
        let (aes_key, mac_key) = derived.split_at(16);

        if Self::mac(mac_key, &ciphertext) != expected_mac {
            return Err(SigningError::SeedEncryption(
                "wrong passphrase or corrupted seed record".to_string(),
            ));
        }

        let mut plaintext = ciphertext;
        let mut cipher = Aes128Ctr::new(aes_key.into(), iv.as_slice().into());
        cipher.apply_keystream(&mut plaintext);

        if plaintext.len() != 32 {
            return Err(SigningError::SeedEncryption(format!(
                "decrypted seed must have 32 bytes, got {}",
                plaintext.len()
            )));
        }

        let mut seed = [0u8; 32];
        seed.copy_from_slice(&plaintext);
        Ok(seed)
    }

    fn derive_key(&self, salt: &[u8]) -> Result<[u8; 32], SigningError> {
        let params = ScryptParams::new(SCRYPT_LOG_N, SCRYPT_R, SCRYPT_P, DERIVED_KEY_LEN)
            .map_err(|e| SigningError::SeedEncryption(format!("scrypt params: {}", e)))?;

        let mut derived = [0u8; 32];
        scrypt(self.passphrase.as_bytes(), salt, &params, &mut derived)
            .map_err(|e| SigningError::SeedEncryption(format!("scrypt: {}", e)))?;
        Ok(derived)
    }

    fn mac(mac_key: &[u8], ciphertext: &[u8]) -> Vec<u8> {
        let mut hasher = Sha256::new();
        hasher.update(mac_key);
        hasher.update(ciphertext);
        hasher.finalize().to_vec()
    }
}

fn decode_hex_field(name: &str, value: &str) -> Result<Vec<u8>, SigningError> {
    hex::decode(value)
        .map_err(|e| SigningError::SeedEncryption(format!("invalid hex in {}: {}", name, e)))
}
