//! Provider-specific behavior plugged into [`Provider`].

// self
use crate::{
	_prelude::*,
	auth::OAuth2Tokens,
	provider::{Provider, RequestOptions},
};

/// Boxed future returned by [`ProviderHooks`] methods.
pub type HookFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + 'a + Send>>;

/// Operations a concrete integration supplies.
///
/// Only the health check is mandatory, since credential validity can only be confirmed by a
/// real call against the provider.
pub trait ProviderHooks
where
	Self: 'static + Send + Sync,
{
	/// Performs a cheap authenticated call proving the credentials work.
	fn health_check<'a>(&'a self, provider: &'a Provider) -> HookFuture<'a, ()>;

	/// Cleans up provider-side resources before the integration is torn down.
	fn on_disconnect<'a>(&'a self, provider: &'a Provider) -> HookFuture<'a, ()> {
		let _ = provider;

		Box::pin(async { Ok(()) })
	}

	/// Revokes `tokens` server-side. Not every provider supports revocation.
	fn revoke_remote<'a>(
		&'a self,
		provider: &'a Provider,
		tokens: &'a OAuth2Tokens,
	) -> HookFuture<'a, ()> {
		let _ = (provider, tokens);

		Box::pin(async { Ok(()) })
	}
}

/// Hooks for providers exposing a plain health endpoint.
///
/// The health check issues `GET {api_base_url}/{health_path}`. Revocation posts to the
/// provider's RFC 7009 endpoint when one is declared.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StandardHooks {
	health_path: String,
}
impl StandardHooks {
	/// Probes `health_path` under the API base URL.
	pub fn new(health_path: impl Into<String>) -> Self {
		Self { health_path: health_path.into() }
	}

	/// Health path.
	pub fn health_path(&self) -> &str {
		&self.health_path
	}
}
impl ProviderHooks for StandardHooks {
	fn health_check<'a>(&'a self, provider: &'a Provider) -> HookFuture<'a, ()> {
		Box::pin(async move {
			provider.send(RequestOptions::get(self.health_path.as_str())).await?;

			Ok(())
		})
	}

	fn revoke_remote<'a>(
		&'a self,
		provider: &'a Provider,
		tokens: &'a OAuth2Tokens,
	) -> HookFuture<'a, ()> {
		Box::pin(async move { provider.oauth()?.revoke_remote(tokens).await })
	}
}
