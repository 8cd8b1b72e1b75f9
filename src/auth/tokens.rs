//! OAuth 2.0 token sets and their freshness rules.

// self
use crate::{
	_prelude::*,
	auth::{ScopeSet, TokenSecret},
};

/// Margin before expiry at which an access token is refreshed ahead of use.
pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::minutes(5);

/// Token type assumed when the provider omits one.
pub const DEFAULT_TOKEN_TYPE: &str = "Bearer";

/// Freshness of an OAuth credential relative to a refresh margin.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialState {
	/// No tokens are held.
	Unauthenticated,
	/// Access token is valid beyond the refresh margin.
	Valid,
	/// Access token is still valid but inside the refresh margin.
	NearExpiry,
	/// Access token has expired.
	Expired,
}

/// Errors produced by [`OAuth2TokensBuilder`].
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum TokensBuilderError {
	/// No access token value was provided.
	#[error("Access token is required.")]
	MissingAccessToken,
	/// Neither an absolute nor a relative expiry was provided.
	#[error("Expiry must be supplied via expires_at or expires_in.")]
	MissingExpiry,
	/// The relative expiry lands outside the representable date range.
	#[error("Expiry lies outside the supported date range.")]
	ExpiryOutOfRange,
}
impl From<TokensBuilderError> for Error {
	fn from(e: TokensBuilderError) -> Self {
		Error::configuration(e.to_string()).with_source(e)
	}
}

/// Token set issued by an OAuth 2.0 token endpoint.
///
/// The set is replaced wholesale on refresh, so `expires_at` always describes the access token
/// stored next to it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuth2Tokens {
	/// Bearer credential presented to the provider API.
	pub access_token: TokenSecret,
	/// Long-lived credential used to mint new access tokens.
	pub refresh_token: Option<TokenSecret>,
	/// Token type reported by the provider (usually `Bearer`).
	pub token_type: String,
	/// Absolute expiry of `access_token`.
	#[serde(with = "time::serde::rfc3339")]
	pub expires_at: OffsetDateTime,
	/// Scopes granted with the token.
	pub scopes: ScopeSet,
}
impl OAuth2Tokens {
	/// Starts a builder for the given access token.
	pub fn builder(access_token: impl Into<String>) -> OAuth2TokensBuilder {
		OAuth2TokensBuilder::new(access_token)
	}

	/// Remaining lifetime at `now` (negative once expired).
	pub fn remaining_at(&self, now: OffsetDateTime) -> Duration {
		self.expires_at - now
	}

	/// Returns `true` once `now` reaches `expires_at`.
	pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
		now >= self.expires_at
	}

	/// Returns `true` when less than `margin` of lifetime remains.
	pub fn needs_refresh_at(&self, now: OffsetDateTime, margin: Duration) -> bool {
		self.remaining_at(now) < margin
	}

	/// Classifies the token set at `now`.
	pub fn state_at(&self, now: OffsetDateTime, margin: Duration) -> CredentialState {
		if self.is_expired_at(now) {
			CredentialState::Expired
		} else if self.needs_refresh_at(now, margin) {
			CredentialState::NearExpiry
		} else {
			CredentialState::Valid
		}
	}

	/// Keeps `prior` as the refresh token when the provider did not rotate it.
	pub fn retain_refresh_token(mut self, prior: Option<&TokenSecret>) -> Self {
		if self.refresh_token.is_none() {
			self.refresh_token = prior.cloned();
		}

		self
	}

	/// Value for the `Authorization` header.
	pub fn authorization_header(&self) -> String {
		let scheme = if self.token_type.eq_ignore_ascii_case("bearer") {
			DEFAULT_TOKEN_TYPE
		} else {
			self.token_type.as_str()
		};

		format!("{scheme} {}", self.access_token.expose())
	}
}
impl Debug for OAuth2Tokens {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("OAuth2Tokens")
			.field("access_token", &self.access_token)
			.field("refresh_token", &self.refresh_token)
			.field("token_type", &self.token_type)
			.field("expires_at", &self.expires_at)
			.field("scopes", &self.scopes)
			.finish()
	}
}

/// Builder for [`OAuth2Tokens`].
#[derive(Clone, Debug)]
pub struct OAuth2TokensBuilder {
	access_token: Option<TokenSecret>,
	refresh_token: Option<TokenSecret>,
	token_type: Option<String>,
	issued_at: Option<OffsetDateTime>,
	expires_at: Option<OffsetDateTime>,
	expires_in: Option<Duration>,
	scopes: ScopeSet,
}
impl OAuth2TokensBuilder {
	fn new(access_token: impl Into<String>) -> Self {
		let access_token = access_token.into();

		Self {
			access_token: (!access_token.is_empty()).then(|| TokenSecret::new(access_token)),
			refresh_token: None,
			token_type: None,
			issued_at: None,
			expires_at: None,
			expires_in: None,
			scopes: ScopeSet::default(),
		}
	}

	/// Sets the refresh token.
	pub fn refresh_token(mut self, token: impl Into<String>) -> Self {
		self.refresh_token = Some(TokenSecret::new(token));

		self
	}

	/// Sets the token type.
	pub fn token_type(mut self, token_type: impl Into<String>) -> Self {
		self.token_type = Some(token_type.into());

		self
	}

	/// Sets the instant `expires_in` is measured from (defaults to now).
	pub fn issued_at(mut self, instant: OffsetDateTime) -> Self {
		self.issued_at = Some(instant);

		self
	}

	/// Sets the absolute expiry.
	pub fn expires_at(mut self, instant: OffsetDateTime) -> Self {
		self.expires_at = Some(instant);

		self
	}

	/// Sets the lifetime relative to the issue instant.
	pub fn expires_in(mut self, lifetime: Duration) -> Self {
		self.expires_in = Some(lifetime);

		self
	}

	/// Sets the granted scopes.
	pub fn scopes(mut self, scopes: ScopeSet) -> Self {
		self.scopes = scopes;

		self
	}

	/// Validates the builder and produces the token set.
	pub fn build(self) -> Result<OAuth2Tokens, TokensBuilderError> {
		let access_token = self.access_token.ok_or(TokensBuilderError::MissingAccessToken)?;
		let expires_at = match (self.expires_at, self.expires_in) {
			(Some(instant), _) => instant,
			(None, Some(lifetime)) => self
				.issued_at
				.unwrap_or_else(OffsetDateTime::now_utc)
				.checked_add(lifetime)
				.ok_or(TokensBuilderError::ExpiryOutOfRange)?,
			(None, None) => return Err(TokensBuilderError::MissingExpiry),
		};

		Ok(OAuth2Tokens {
			access_token,
			refresh_token: self.refresh_token,
			token_type: self.token_type.unwrap_or_else(|| DEFAULT_TOKEN_TYPE.to_owned()),
			expires_at,
			scopes: self.scopes,
		})
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;

	fn tokens(expires_at: OffsetDateTime) -> OAuth2Tokens {
		OAuth2Tokens::builder("access")
			.refresh_token("refresh")
			.expires_at(expires_at)
			.build()
			.expect("Token fixture should build.")
	}

	#[test]
	fn refresh_margin_is_strict() {
		let now = macros::datetime!(2025-03-01 12:00 UTC);

		assert!(tokens(now + Duration::minutes(4)).needs_refresh_at(now, DEFAULT_REFRESH_MARGIN));
		assert!(!tokens(now + Duration::minutes(6)).needs_refresh_at(now, DEFAULT_REFRESH_MARGIN));
		assert_eq!(
			tokens(now + Duration::minutes(4)).state_at(now, DEFAULT_REFRESH_MARGIN),
			CredentialState::NearExpiry
		);
		assert_eq!(
			tokens(now - Duration::seconds(1)).state_at(now, DEFAULT_REFRESH_MARGIN),
			CredentialState::Expired
		);
	}

	#[test]
	fn relative_expiry_is_anchored_to_issue_time() {
		let issued = macros::datetime!(2025-03-01 12:00 UTC);
		let tokens = OAuth2Tokens::builder("access")
			.issued_at(issued)
			.expires_in(Duration::seconds(3_600))
			.build()
			.expect("Token fixture should build.");

		assert_eq!(tokens.expires_at, macros::datetime!(2025-03-01 13:00 UTC));
		assert_eq!(tokens.token_type, DEFAULT_TOKEN_TYPE);
	}

	#[test]
	fn builder_requires_access_token_and_expiry() {
		assert_eq!(
			OAuth2Tokens::builder("").expires_in(Duration::HOUR).build(),
			Err(TokensBuilderError::MissingAccessToken)
		);
		assert_eq!(OAuth2Tokens::builder("a").build(), Err(TokensBuilderError::MissingExpiry));
	}

	#[test]
	fn oversized_lifetimes_are_rejected() {
		assert_eq!(
			OAuth2Tokens::builder("a").expires_in(Duration::seconds(9_000_000_000_000)).build(),
			Err(TokensBuilderError::ExpiryOutOfRange)
		);
	}

	#[test]
	fn unrotated_refresh_token_is_retained() {
		let prior = TokenSecret::new("refresh-old");
		let rotated = OAuth2Tokens::builder("new")
			.expires_in(Duration::HOUR)
			.build()
			.expect("Token fixture should build.")
			.retain_refresh_token(Some(&prior));

		assert_eq!(rotated.refresh_token, Some(prior));
	}

	#[test]
	fn debug_output_redacts_secrets() {
		let rendered = format!("{:?}", tokens(OffsetDateTime::now_utc()));

		assert!(!rendered.contains("access\""));
		assert!(rendered.contains("[REDACTED]"));
	}
}
