//! Per-tenant installed integrations.

// crates.io
use serde_json::{Map, Value};
// self
use crate::{
	_prelude::*,
	auth::{IntegrationId, ProviderId, TenantId, UserId},
};

/// Lifecycle state of an installed integration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationState {
	/// Credentials work and the last health check passed.
	Connected,
	/// The last health check or call failed.
	Error,
	/// The integration was torn down.
	Disconnected,
}

/// One tenant's configured instance of a provider.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationConfig {
	/// Integration identifier.
	pub id: IntegrationId,
	/// Provider type.
	pub provider: ProviderId,
	/// Owning tenant.
	pub tenant: TenantId,
	/// User who connected the integration, if any.
	pub user: Option<UserId>,
	/// Lifecycle state.
	pub state: IntegrationState,
	/// Most recent failure message.
	pub last_error: Option<String>,
	/// Arbitrary provider-specific settings.
	pub metadata: Map<String, Value>,
	/// Last state change.
	#[serde(with = "time::serde::rfc3339")]
	pub updated_at: OffsetDateTime,
}
impl IntegrationConfig {
	/// Creates a connected integration.
	pub fn new(id: IntegrationId, provider: ProviderId, tenant: TenantId) -> Self {
		Self {
			id,
			provider,
			tenant,
			user: None,
			state: IntegrationState::Connected,
			last_error: None,
			metadata: Map::new(),
			updated_at: OffsetDateTime::now_utc(),
		}
	}

	/// Sets the connecting user.
	pub fn with_user(mut self, user: UserId) -> Self {
		self.user = Some(user);

		self
	}

	/// Adds one metadata entry.
	pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
		self.metadata.insert(key.into(), value.into());

		self
	}

	/// Moves to `state`, recording `last_error` (cleared on success states).
	pub fn transition(&mut self, state: IntegrationState, last_error: Option<String>) {
		self.state = state;
		self.last_error = last_error;
		self.updated_at = OffsetDateTime::now_utc();
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn transitions_stamp_state_and_error() {
		let mut config = IntegrationConfig::new(
			IntegrationId::new("int-1").expect("Integration fixture should be valid."),
			ProviderId::new("calendar").expect("Provider fixture should be valid."),
			TenantId::new("acme").expect("Tenant fixture should be valid."),
		)
		.with_metadata("calendarId", "primary");
		let before = config.updated_at;

		config.transition(IntegrationState::Error, Some("boom".into()));

		assert_eq!(config.state, IntegrationState::Error);
		assert_eq!(config.last_error.as_deref(), Some("boom"));
		assert!(config.updated_at >= before);

		let json = serde_json::to_value(&config).expect("Config should serialize.");

		assert_eq!(json["state"], "error");
		assert_eq!(json["metadata"]["calendarId"], "primary");
	}
}
