//! Symmetric encryption for persisted credentials and OAuth `state` blobs.
//!
//! Ciphertexts are rendered as URL-safe base64 (no padding) of `nonce || ciphertext || tag`, so
//! they can travel inside query strings and text columns unchanged.

// crates.io
use aes_gcm::{
	Aes256Gcm, Nonce,
	aead::{Aead, AeadCore, KeyInit, OsRng},
};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
// self
use crate::_prelude::*;

/// AES-256 key length in bytes.
pub const KEY_LEN: usize = 32;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Reversible encryption used for tokens at rest and for the OAuth `state` parameter.
pub trait SecretCipher
where
	Self: Send + Sync,
{
	/// Encrypts `plaintext` into a URL-safe string.
	fn encrypt(&self, plaintext: &[u8]) -> Result<String>;

	/// Decrypts a value produced by [`SecretCipher::encrypt`].
	fn decrypt(&self, ciphertext: &str) -> Result<Vec<u8>>;
}
impl dyn SecretCipher {
	/// Encrypts a UTF-8 string.
	pub fn encrypt_str(&self, plaintext: &str) -> Result<String> {
		self.encrypt(plaintext.as_bytes())
	}

	/// Decrypts into a UTF-8 string.
	pub fn decrypt_string(&self, ciphertext: &str) -> Result<String> {
		let bytes = self.decrypt(ciphertext)?;

		String::from_utf8(bytes)
			.map_err(|e| Error::configuration("Decrypted value is not valid UTF-8.").with_source(e))
	}
}

/// AES-256-GCM cipher with a random 96-bit nonce per message.
#[derive(Clone)]
pub struct AesGcmCipher(Aes256Gcm);
impl AesGcmCipher {
	/// Builds a cipher from a raw 32-byte key.
	pub fn new(key: &[u8]) -> Result<Self> {
		if key.len() != KEY_LEN {
			return Err(Error::configuration(format!(
				"Encryption key must be exactly {KEY_LEN} bytes."
			)));
		}

		let cipher = Aes256Gcm::new_from_slice(key)
			.map_err(|e| Error::configuration("Encryption key was rejected.").with_source(e))?;

		Ok(Self(cipher))
	}

	/// Builds a cipher from a base64 (standard or URL-safe) encoded key.
	pub fn from_base64(encoded: &str) -> Result<Self> {
		use base64::engine::general_purpose::STANDARD;

		let trimmed = encoded.trim();
		let key = STANDARD
			.decode(trimmed)
			.or_else(|_| URL_SAFE_NO_PAD.decode(trimmed.trim_end_matches('=')))
			.map_err(|e| Error::configuration("Encryption key is not valid base64.").with_source(e))?;

		Self::new(&key)
	}

	/// Generates a random key, returned base64-encoded for configuration files.
	pub fn generate_key() -> String {
		URL_SAFE_NO_PAD.encode(Aes256Gcm::generate_key(OsRng))
	}
}
impl SecretCipher for AesGcmCipher {
	fn encrypt(&self, plaintext: &[u8]) -> Result<String> {
		let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
		let sealed = self
			.0
			.encrypt(&nonce, plaintext)
			.map_err(|e| Error::configuration("Encryption failed.").with_source(CipherFailure(e)))?;
		let mut buf = Vec::with_capacity(NONCE_LEN + sealed.len());

		buf.extend_from_slice(&nonce);
		buf.extend_from_slice(&sealed);

		Ok(URL_SAFE_NO_PAD.encode(buf))
	}

	fn decrypt(&self, ciphertext: &str) -> Result<Vec<u8>> {
		let raw = URL_SAFE_NO_PAD
			.decode(ciphertext)
			.map_err(|e| Error::authentication("Encrypted value is malformed.").with_source(e))?;

		if raw.len() < NONCE_LEN + TAG_LEN {
			return Err(Error::authentication("Encrypted value is truncated."));
		}

		let (nonce, sealed) = raw.split_at(NONCE_LEN);

		self.0.decrypt(Nonce::from_slice(nonce), sealed).map_err(|e| {
			Error::authentication("Encrypted value failed authentication.")
				.with_source(CipherFailure(e))
		})
	}
}
impl Debug for AesGcmCipher {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("AesGcmCipher(..)")
	}
}

#[derive(Debug, ThisError)]
#[error("AEAD operation failed: {0}.")]
struct CipherFailure(aes_gcm::Error);

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn cipher() -> Arc<dyn SecretCipher> {
		Arc::new(AesGcmCipher::new(&[7_u8; KEY_LEN]).expect("Fixed key should be accepted."))
	}

	#[test]
	fn sealed_values_open_and_are_url_safe() {
		let cipher = cipher();
		let sealed = cipher.encrypt_str("refresh-token").expect("Encryption should succeed.");

		assert!(sealed.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_'));
		assert_eq!(
			cipher.decrypt_string(&sealed).expect("Decryption should succeed."),
			"refresh-token"
		);
		assert_ne!(sealed, cipher.encrypt_str("refresh-token").expect("Encryption should succeed."));
	}

	#[test]
	fn tampering_is_detected() {
		let cipher = cipher();
		let mut sealed = cipher.encrypt_str("state").expect("Encryption should succeed.");
		let last = sealed.pop().expect("Ciphertext should not be empty.");

		sealed.push(if last == 'A' { 'B' } else { 'A' });

		let err = cipher.decrypt(&sealed).expect_err("Tampered ciphertext must be rejected.");

		assert_eq!(err.kind(), &ErrorKind::Authentication);
		assert!(cipher.decrypt("short").is_err());
	}

	#[test]
	fn keys_are_validated() {
		assert!(AesGcmCipher::new(&[0_u8; 16]).is_err());
		assert!(AesGcmCipher::from_base64(&AesGcmCipher::generate_key()).is_ok());
	}
}
