//! RFC 7636 Proof Key for Code Exchange.

// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::Rng;
use sha2::{Digest, Sha256};
// self
use crate::{_prelude::*, auth::TokenSecret};

/// Length of generated code verifiers (the RFC maximum).
pub const PKCE_VERIFIER_LEN: usize = 128;

const UNRESERVED: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";

/// Supported PKCE challenge methods.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PkceMethod {
	/// SHA-256 challenge.
	S256,
}
impl PkceMethod {
	/// RFC 7636 identifier.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::S256 => "S256",
		}
	}
}

/// Verifier and its derived challenge.
#[derive(Clone, Debug)]
pub struct PkcePair {
	/// Secret verifier sent with the code exchange.
	pub verifier: TokenSecret,
	/// Challenge sent with the authorization request.
	pub challenge: String,
	/// Challenge method.
	pub method: PkceMethod,
}
impl PkcePair {
	/// Generates a random 128-character verifier from the unreserved alphabet.
	pub fn generate() -> Self {
		let mut rng = rand::rng();
		let verifier: String = (0..PKCE_VERIFIER_LEN)
			.map(|_| char::from(UNRESERVED[rng.random_range(0..UNRESERVED.len())]))
			.collect();

		Self::from_verifier(verifier)
	}

	/// Derives the S256 challenge for a known verifier.
	pub fn from_verifier(verifier: impl Into<String>) -> Self {
		let verifier = verifier.into();
		let challenge = code_challenge(&verifier);

		Self { verifier: TokenSecret::new(verifier), challenge, method: PkceMethod::S256 }
	}
}

/// Computes `base64url(SHA256(verifier))` without padding.
pub fn code_challenge(verifier: &str) -> String {
	let digest = Sha256::digest(verifier.as_bytes());

	URL_SAFE_NO_PAD.encode(digest)
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn matches_rfc7636_appendix_b() {
		let pair = PkcePair::from_verifier("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk");

		assert_eq!(pair.challenge, "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM");
		assert_eq!(pair.method.as_str(), "S256");
	}

	#[test]
	fn generated_verifiers_use_unreserved_characters() {
		let pair = PkcePair::generate();
		let verifier = pair.verifier.expose();

		assert_eq!(verifier.len(), PKCE_VERIFIER_LEN);
		assert!(verifier.bytes().all(|byte| UNRESERVED.contains(&byte)));
		assert_eq!(pair.challenge, code_challenge(verifier));
		assert!(!pair.challenge.ends_with('='));
	}
}
