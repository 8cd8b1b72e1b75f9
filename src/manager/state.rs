//! Encrypted OAuth `state` payload.
//!
//! The payload carries the routing context of an authorization round trip (provider, tenant,
//! user, caller-supplied fields, and the PKCE verifier when one is needed). It is sealed with the
//! manager's [`SecretCipher`], which makes the value both unguessable and tamper-evident, so no
//! server-side session is needed between the redirect and the callback.

// crates.io
use serde_json::{Map, Value};
// self
use crate::{
	_prelude::*,
	auth::{ProviderId, TenantId, TokenSecret, UserId},
	crypto::SecretCipher,
};

/// Maximum clock skew tolerated for states stamped in the future.
pub const STATE_MAX_SKEW: Duration = Duration::minutes(1);

const RESERVED_KEYS: [&str; 5] = ["providerId", "tenantId", "userId", "timestamp", "pkceVerifier"];

/// Decrypted `state` contents.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthState {
	/// Provider the flow was started for.
	pub provider_id: ProviderId,
	/// Tenant that started the flow.
	pub tenant_id: TenantId,
	/// User that started the flow.
	pub user_id: Option<UserId>,
	/// Creation time in Unix milliseconds.
	pub timestamp: i64,
	/// PKCE verifier for providers that require PKCE.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub pkce_verifier: Option<TokenSecret>,
	/// Caller-supplied fields, returned untouched after the exchange.
	#[serde(flatten)]
	pub custom: Map<String, Value>,
}
impl OAuthState {
	/// Stamps a new state with the current time.
	///
	/// Custom keys may not shadow the built-in fields.
	pub fn new(
		provider_id: ProviderId,
		tenant_id: TenantId,
		user_id: Option<UserId>,
		custom: Map<String, Value>,
	) -> Result<Self> {
		if let Some(key) = custom.keys().find(|key| RESERVED_KEYS.contains(&key.as_str())) {
			return Err(Error::configuration(format!(
				"Custom OAuth state may not override the reserved `{key}` field."
			)));
		}

		Ok(Self {
			provider_id,
			tenant_id,
			user_id,
			timestamp: unix_millis(OffsetDateTime::now_utc()),
			pkce_verifier: None,
			custom,
		})
	}

	/// Creation time.
	pub fn issued_at(&self) -> Result<OffsetDateTime> {
		OffsetDateTime::from_unix_timestamp_nanos(i128::from(self.timestamp) * 1_000_000)
			.map_err(|e| {
				Error::authentication("OAuth state timestamp is out of range.").with_source(e)
			})
	}

	/// Rejects states older than `max_age` or stamped beyond the tolerated clock skew.
	pub fn validate_age(&self, now: OffsetDateTime, max_age: Duration) -> Result<()> {
		let age = now - self.issued_at()?;

		if age > max_age {
			return Err(Error::authentication(format!(
				"OAuth state expired {} seconds ago; restart the authorization.",
				(age - max_age).whole_seconds()
			))
			.with_provider(self.provider_id.clone()));
		}
		if -age > STATE_MAX_SKEW {
			return Err(Error::authentication("OAuth state was issued in the future.")
				.with_provider(self.provider_id.clone()));
		}

		Ok(())
	}

	/// Serializes and encrypts the state.
	pub fn seal(&self, cipher: &dyn SecretCipher) -> Result<String> {
		let json = serde_json::to_vec(self).map_err(|e| {
			Error::configuration("OAuth state could not be serialized.").with_source(e)
		})?;

		cipher.encrypt(&json)
	}

	/// Decrypts and parses a sealed state. Tampered or foreign values fail with
	/// `AuthenticationError`.
	pub fn open(sealed: &str, cipher: &dyn SecretCipher) -> Result<Self> {
		let json = cipher.decrypt(sealed)?;

		serde_json::from_slice(&json).map_err(|e| {
			Error::authentication("OAuth state payload is not recognized.").with_source(e)
		})
	}
}

fn unix_millis(instant: OffsetDateTime) -> i64 {
	i64::try_from(instant.unix_timestamp_nanos() / 1_000_000).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{crypto::AesGcmCipher, error::ErrorKind};

	fn state(custom: Map<String, Value>) -> Result<OAuthState> {
		OAuthState::new(
			ProviderId::new("calendar").expect("Provider fixture should be valid."),
			TenantId::new("acme").expect("Tenant fixture should be valid."),
			Some(UserId::new("u-7").expect("User fixture should be valid.")),
			custom,
		)
	}

	fn cipher() -> AesGcmCipher {
		AesGcmCipher::new(&[7; 32]).expect("Cipher fixture should be valid.")
	}

	#[test]
	fn sealed_state_round_trips_with_custom_fields() {
		let mut custom = Map::new();

		custom.insert("returnTo".into(), "/settings/integrations".into());

		let mut original = state(custom).expect("State should build.");

		original.pkce_verifier = Some(TokenSecret::new("verifier"));

		let sealed = original.seal(&cipher()).expect("State should seal.");

		let opened = OAuthState::open(&sealed, &cipher()).expect("State should open.");

		assert_eq!(opened, original);
		assert_eq!(opened.custom["returnTo"], "/settings/integrations");
	}

	#[test]
	fn reserved_keys_are_rejected() {
		let mut custom = Map::new();

		custom.insert("tenantId".into(), "other".into());

		let err = state(custom).expect_err("Shadowing a reserved key should fail.");

		assert_eq!(err.kind(), &ErrorKind::Configuration);
	}

	#[test]
	fn age_window_is_enforced() {
		let now = OffsetDateTime::now_utc();
		let mut stale = state(Map::new()).expect("State should build.");

		stale.timestamp = unix_millis(now - Duration::minutes(11));

		let err =
			stale.validate_age(now, Duration::minutes(10)).expect_err("Stale state should fail.");

		assert_eq!(err.kind(), &ErrorKind::Authentication);

		stale.timestamp = unix_millis(now - Duration::minutes(9));

		assert!(stale.validate_age(now, Duration::minutes(10)).is_ok());

		stale.timestamp = unix_millis(now + Duration::minutes(5));

		assert!(stale.validate_age(now, Duration::minutes(10)).is_err());
	}

	#[test]
	fn foreign_ciphertext_is_an_authentication_error() {
		let sealed = state(Map::new())
			.expect("State should build.")
			.seal(&cipher())
			.expect("State should seal.");
		let other = AesGcmCipher::new(&[9; 32]).expect("Cipher fixture should be valid.");
		let err = OAuthState::open(&sealed, &other).expect_err("Foreign key should fail.");

		assert_eq!(err.kind(), &ErrorKind::Authentication);
	}
}
