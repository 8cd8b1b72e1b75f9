//! Walks through starting a tenant-scoped authorization-code + PKCE flow and decoding the
//! `state` the provider sends back to the redirect handler.

// std
use std::sync::Arc;
// crates.io
use color_eyre::Result;
use serde_json::{Map, Value};
use url::Url;
// self
use integration_hub::{
	auth::{ProviderId, ScopeSet, TenantId, UserId},
	config::IntegrationSettings,
	context::IntegrationContext,
	crypto::{AesGcmCipher, SecretCipher},
	manager::OAuthManager,
	oauth::OAuthApp,
	provider::{AuthKind, ProviderMetadata},
	store::{CredentialStore, MemoryStore},
};

fn main() -> Result<()> {
	color_eyre::install()?;

	let context = Arc::new(IntegrationContext::with_reqwest(IntegrationSettings::default())?);
	let store: Arc<dyn CredentialStore> = Arc::new(MemoryStore::default());
	let cipher: Arc<dyn SecretCipher> =
		Arc::new(AesGcmCipher::from_base64(&AesGcmCipher::generate_key())?);
	let manager = OAuthManager::new(store, cipher, context);
	let provider = ProviderId::new("calendar")?;
	let metadata = ProviderMetadata::builder(provider.clone(), AuthKind::OAuth2)
		.name("Calendar")
		.authorization_endpoint(Url::parse("https://calendar.example.com/oauth/authorize")?)
		.token_endpoint(Url::parse("https://calendar.example.com/oauth/token")?)
		.scopes(ScopeSet::new(["calendar.read", "calendar.write"])?)
		.pkce_required(true)
		.authorize_param("access_type", "offline")
		.build()?;

	manager.register_provider(
		metadata,
		OAuthApp::new(
			"demo-client",
			"demo-secret",
			Url::parse("https://hr.example.com/oauth/callback")?,
		),
	)?;

	let mut custom = Map::new();

	custom.insert("returnTo".into(), Value::from("/settings/integrations"));

	let url = manager.get_authorization_url(
		&provider,
		&TenantId::new("tenant-acme")?,
		Some(&UserId::new("user-123")?),
		custom,
	)?;

	println!("Send your user to {url}.");

	// Simulate the redirect handler receiving `state` back from the provider.
	let Some(returned_state) =
		url.query_pairs().find(|(key, _)| key == "state").map(|(_, value)| value.into_owned())
	else {
		eprintln!("Authorization URL carries no state.");

		return Ok(());
	};
	let state = manager.open_state(&returned_state)?;

	println!(
		"Callback belongs to tenant {} (user {:?}) and returns to {}.",
		state.tenant_id, state.user_id, state.custom["returnTo"]
	);
	println!("Call OAuthManager::exchange_code_for_tokens with the code and this state.");

	Ok(())
}
