//! RSA key exchange, AES-CBC frame encryption, and password hashing.
//!
//! Key material never implements `Debug`/`Display` for its raw bytes,
//! so it cannot leak into a `tracing` field or a panic message.

use std::path::Path;

use aes::Aes128;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::RngCore;
use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};

use crate::error::{Result, ServerError};

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;

const RSA_BITS: usize = 2048;
const AES_KEY_LEN: usize = 16;
const AES_IV_LEN: usize = 16;

/// The server's long-lived RSA identity.
pub struct ServerKeyPair {
    private: RsaPrivateKey,
    public_pem_b64: String,
}

impl ServerKeyPair {
    /// Loads the key pair from `path`, generating and persisting a fresh
    /// one on first run.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        let private = if path.exists() {
            let pem = std::fs::read_to_string(path)?;
            RsaPrivateKey::from_pkcs8_pem(&pem)
                .map_err(|e| ServerError::CryptoFailure(e.to_string()))?
        } else {
            let private = RsaPrivateKey::new(&mut OsRng, RSA_BITS)?;
            let pem = private
                .to_pkcs8_pem(Default::default())
                .map_err(|e| ServerError::CryptoFailure(e.to_string()))?;
            std::fs::write(path, pem.as_bytes())?;
            private
        };
        let public = RsaPublicKey::from(&private);
        let pem = public
            .to_public_key_pem(Default::default())
            .map_err(|e| ServerError::CryptoFailure(e.to_string()))?;
        Ok(Self {
            private,
            public_pem_b64: BASE64.encode(pem.as_bytes()),
        })
    }

    /// Base64-encoded PEM public key, sent plaintext as the first
    /// key-exchange frame.
    #[must_use]
    pub fn public_key_b64(&self) -> &str {
        &self.public_pem_b64
    }

    /// Unwraps a client's RSA-OAEP(SHA-256)-encrypted AES key.
    pub fn decrypt_aes_key(&self, ciphertext: &[u8]) -> Result<AesKey> {
        let padding = Oaep::new::<Sha256>();
        let plain = self
            .private
            .decrypt(padding, ciphertext)
            .map_err(|e| ServerError::CryptoFailure(e.to_string()))?;
        AesKey::from_bytes(&plain)
    }
}

/// Parses a client-supplied PEM public key (used by the client role in
/// tests, and by any future peer-to-peer handshake).
pub fn parse_public_key_pem(pem: &str) -> Result<RsaPublicKey> {
    RsaPublicKey::from_public_key_pem(pem).map_err(|e| ServerError::CryptoFailure(e.to_string()))
}

/// RSA-OAEP(SHA-256) encrypts `plain` for `peer`.
pub fn encrypt_rsa(peer: &RsaPublicKey, plain: &[u8]) -> Result<Vec<u8>> {
    let padding = Oaep::new::<Sha256>();
    peer.encrypt(&mut OsRng, padding, plain)
        .map_err(|e| ServerError::CryptoFailure(e.to_string()))
}

/// A per-session AES-128 key used to seal/open every frame after key
/// exchange.
#[derive(Clone)]
pub struct AesKey([u8; AES_KEY_LEN]);

impl AesKey {
    /// Generates a fresh random key.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; AES_KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; AES_KEY_LEN] = bytes
            .try_into()
            .map_err(|_| ServerError::CryptoFailure("AES key must be 16 bytes".into()))?;
        Ok(Self(arr))
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; AES_KEY_LEN] {
        &self.0
    }

    /// AES-128-CBC + PKCS7 encrypts `plain` under a fresh random IV.
    /// Returns `(ciphertext, iv)`.
    #[must_use]
    pub fn seal(&self, plain: &[u8]) -> (Vec<u8>, [u8; AES_IV_LEN]) {
        let mut iv = [0u8; AES_IV_LEN];
        OsRng.fill_bytes(&mut iv);
        let ciphertext = Aes128CbcEnc::new(&self.0.into(), &iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plain);
        (ciphertext, iv)
    }

    /// Inverse of [`Self::seal`]. Fails with `CryptoFailure` on bad
    /// padding (truncated or tampered ciphertext).
    pub fn open(&self, ciphertext: &[u8], iv: &[u8; AES_IV_LEN]) -> Result<Vec<u8>> {
        Aes128CbcDec::new(&self.0.into(), iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| ServerError::CryptoFailure("bad padding".into()))
    }
}

/// `n` cryptographically random bytes.
#[must_use]
pub fn random_bytes(n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    OsRng.fill_bytes(&mut buf);
    buf
}

/// SHA-256(password ∥ salt ∥ pepper), hex-encoded.
#[must_use]
pub fn hash_password(password: &str, salt: &[u8], pepper: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hasher.update(salt);
    hasher.update(pepper);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_then_open_round_trips() {
        let key = AesKey::generate();
        let plain = b"the quick brown fox";
        let (ct, iv) = key.seal(plain);
        let opened = key.open(&ct, &iv).unwrap();
        assert_eq!(opened, plain);
    }

    #[test]
    fn hash_password_is_deterministic() {
        let salt = [1u8; 16];
        let pepper = b"pepper";
        let a = hash_password("hunter2", &salt, pepper);
        let b = hash_password("hunter2", &salt, pepper);
        assert_eq!(a, b);
    }

    #[test]
    fn hash_password_differs_by_salt() {
        let pepper = b"pepper";
        let a = hash_password("hunter2", &[1u8; 16], pepper);
        let b = hash_password("hunter2", &[2u8; 16], pepper);
        assert_ne!(a, b);
    }

    #[test]
    fn rsa_round_trip_via_key_pair() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("private.pem");
        let server = ServerKeyPair::load_or_create(&path).unwrap();

        let pem = BASE64.decode(server.public_key_b64()).unwrap();
        let pem = String::from_utf8(pem).unwrap();
        let pub_key = parse_public_key_pem(&pem).unwrap();

        let aes_key = AesKey::generate();
        let wrapped = encrypt_rsa(&pub_key, aes_key.as_bytes()).unwrap();

        let unwrapped = server.decrypt_aes_key(&wrapped).unwrap();
        assert_eq!(unwrapped.as_bytes(), aes_key.as_bytes());
    }
}
