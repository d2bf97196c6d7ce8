//! Primitives of the PIN pairing exchange.

use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::{Aes128, Block};
use rand::RngCore;
use rustls::pki_types::CertificateDer;
use sha2::{Digest, Sha256};
use tracing::debug;

pub const SALT_LEN: usize = 16;
pub const CHALLENGE_LEN: usize = 16;
pub const SECRET_LEN: usize = 16;
pub const HASH_LEN: usize = 32;

pub type AesKey = [u8; 16];

pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut out = [0u8; N];
    rand::thread_rng().fill_bytes(&mut out);
    out
}

pub fn sha256(parts: &[&[u8]]) -> [u8; HASH_LEN] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// First 16 bytes of SHA-256(salt ‖ pin).
pub fn pin_key(salt: &[u8; SALT_LEN], pin: &str) -> AesKey {
    let digest = sha256(&[&salt[..], pin.as_bytes()]);
    let mut key = [0u8; 16];
    key.copy_from_slice(&digest[..16]);
    key
}

/// AES-128-ECB over `data` zero-padded to the block size.
pub fn encrypt_ecb(key: &AesKey, data: &[u8]) -> Vec<u8> {
    let cipher = Aes128::new(key.into());
    let mut out = padded(data);
    for chunk in out.chunks_exact_mut(16) {
        cipher.encrypt_block(Block::from_mut_slice(chunk));
    }
    out
}

pub fn decrypt_ecb(key: &AesKey, data: &[u8]) -> Vec<u8> {
    let cipher = Aes128::new(key.into());
    let mut out = padded(data);
    for chunk in out.chunks_exact_mut(16) {
        cipher.decrypt_block(Block::from_mut_slice(chunk));
    }
    out
}

fn padded(data: &[u8]) -> Vec<u8> {
    let mut out = data.to_vec();
    let rem = out.len() % 16;
    if rem != 0 {
        out.resize(out.len() + 16 - rem, 0);
    }
    out
}

/// Checks `signature` over `message` with the public key of `cert`.
pub fn verify_host_signature(cert: &CertificateDer<'_>, message: &[u8], signature: &[u8]) -> bool {
    let cert = match webpki::EndEntityCert::try_from(cert) {
        Ok(cert) => cert,
        Err(e) => {
            debug!("Host certificate unparseable: {:?}", e);
            return false;
        }
    };
    [
        webpki::ring::RSA_PKCS1_2048_8192_SHA256,
        webpki::ring::ECDSA_P256_SHA256,
        webpki::ring::ECDSA_P384_SHA384,
    ]
    .into_iter()
    .any(|alg| cert.verify_signature(alg, message, signature).is_ok())
}
