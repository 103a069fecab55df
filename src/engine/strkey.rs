use base32::Alphabet;

use crate::error::SigningError;

// Strkey version bytes, shifted so the first base32 character comes out as
// the familiar leading letter.
const VERSION_ED25519_PUBLIC_KEY: u8 = 6 << 3; // 'G'
const VERSION_ED25519_SECRET_SEED: u8 = 18 << 3; // 'S'

const ALPHABET: Alphabet = Alphabet::Rfc4648 { padding: false };

/// CRC16-XMODEM over the version byte and payload.
fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

fn encode(version: u8, payload: &[u8; 32]) -> String {
    let mut data = Vec::with_capacity(35);
    data.push(version);
    data.extend_from_slice(payload);
    let checksum = crc16(&data);
    data.push((checksum & 0xFF) as u8);
    data.push((checksum >> 8) as u8);
    base32::encode(ALPHABET, &data)
}

fn decode(version: u8, input: &str) -> Result<[u8; 32], SigningError> {
    let data = base32::decode(ALPHABET, input)
        .ok_or_else(|| SigningError::InvalidStrkey(format!("not valid base32: {}", input)))?;

    if data.len() != 35 {
        return Err(SigningError::InvalidStrkey(format!(
            "expected 35 decoded bytes, got {}",
            data.len()
        )));
    }
    if data[0] != version {
        return Err(SigningError::InvalidStrkey(format!(
            "unexpected version byte {:#04x}",
            data[0]
        )));
    }

    let checksum = (data[33] as u16) | ((data[34] as u16) << 8);
    if checksum != crc16(&data[..33]) {
        return Err(SigningError::InvalidStrkey("checksum mismatch".to_string()));
    }

    let mut payload = [0u8; 32];
    payload.copy_from_slice(&data[1..33]);
    Ok(payload)
}

pub fn encode_ed25519_public_key(payload: &[u8; 32]) -> String {
    encode(VERSION_ED25519_PUBLIC_KEY, payload)
}

pub fn decode_ed25519_public_key(input: &str) -> Result<[u8; 32], SigningError> {
    decode(VERSION_ED25519_PUBLIC_KEY, input)
}

pub fn encode_secret_seed(payload: &[u8; 32]) -> String {
    encode(VERSION_ED25519_SECRET_SEED, payload)
}

pub fn decode_secret_seed(input: &str) -> Result<[u8; 32], SigningError> {
    decode(VERSION_ED25519_SECRET_SEED, input)
}
