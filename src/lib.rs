//! Multi-tenant integration framework for third-party APIs: OAuth 2.0 token lifecycle,
//! API-key and Basic credentials, token-bucket throttling, jittered retries, and one typed error
//! taxonomy shared by every provider.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod config;
pub mod context;
pub mod crypto;
pub mod error;
pub mod http;
pub mod manager;
pub mod oauth;
pub mod obs;
pub mod provider;
pub mod rate_limit;
pub mod retry;
pub mod store;
#[cfg(feature = "reqwest")]
#[doc(hidden)]
pub mod _preludet {
	//! Convenience re-exports and helpers for integration tests and demos.

	pub use crate::_prelude::*;

	// self
	use crate::{
		config::IntegrationSettings,
		context::IntegrationContext,
		crypto::{AesGcmCipher, SecretCipher},
		http::ReqwestTransport,
		manager::OAuthManager,
		obs::{LogSink, MemorySink},
		store::{CredentialStore, MemoryStore},
	};

	/// Builds a reqwest transport that accepts the self-signed certificates produced by
	/// `httpmock` during tests.
	pub fn test_reqwest_transport() -> ReqwestTransport {
		let client = ReqwestClient::builder()
			.danger_accept_invalid_certs(true)
			.danger_accept_invalid_hostnames(true)
			.redirect(reqwest::redirect::Policy::none())
			.build()
			.expect("Failed to build insecure Reqwest client for tests.");

		ReqwestTransport::new(client)
	}

	/// Context over the test transport whose log entries land in the returned sink.
	pub fn build_test_context(
		settings: IntegrationSettings,
	) -> (Arc<IntegrationContext>, Arc<MemorySink>) {
		let sink = Arc::new(MemorySink::default());
		let log_sink: Arc<dyn LogSink> = sink.clone();
		let context = IntegrationContext::new(settings, Arc::new(test_reqwest_transport()))
			.expect("Test settings should be valid.")
			.with_log_sink(log_sink);

		(Arc::new(context), sink)
	}

	/// [`OAuthManager`] backed by an in-memory store and a fixed-key cipher.
	pub fn build_test_manager(
		settings: IntegrationSettings,
	) -> (OAuthManager, Arc<MemoryStore>, Arc<MemorySink>) {
		let (context, sink) = build_test_context(settings);
		let store_backend = Arc::new(MemoryStore::default());
		let store: Arc<dyn CredentialStore> = store_backend.clone();
		let cipher: Arc<dyn SecretCipher> =
			Arc::new(AesGcmCipher::new(&[42; 32]).expect("Test key should be valid."));

		(OAuthManager::new(store, cipher, context), store_backend, sink)
	}
}

mod _prelude {
	pub use std::{
		collections::{BTreeMap, HashMap},
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		str::FromStr,
		sync::Arc,
		time::Duration as StdDuration,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, ErrorKind, Result};
}

#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(all(test, feature = "reqwest"))] use {color_eyre as _, httpmock as _};
