//! Integration error taxonomy shared by providers, the retry manager, the rate limiter, and the
//! OAuth manager.
//!
//! Every failure that crosses a component boundary is an [`Error`]. Raw transport or parsing
//! failures are normalized exactly once through [`wrap_error`]; callers branch on
//! [`Error::kind`], [`Error::is_retryable`], or [`Error::code`] and never on transport types.

// self
use crate::{_prelude::*, auth::ProviderId};

/// Crate-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Boxed error accepted by [`wrap_error`] and stored as an error cause.
pub type BoxError = Box<dyn StdError + Send + Sync>;

const RESPONSE_PREVIEW_LIMIT: usize = 512;
const NETWORK_ERROR_MARKERS: [&str; 11] = [
	"econnreset",
	"etimedout",
	"enotfound",
	"econnrefused",
	"eai_again",
	"epipe",
	"socket hang up",
	"network",
	"connection reset",
	"connection refused",
	"dns error",
];

/// Closed set of failure categories.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
	/// Credentials were rejected or an OAuth handshake failed.
	Authentication,
	/// Access token expired; retry after refreshing.
	TokenExpired,
	/// Refresh-token exchange failed.
	TokenRefresh,
	/// Static credentials are malformed or rejected.
	InvalidCredentials,
	/// Connection-level failure (DNS, TCP reset, refused).
	Network,
	/// Request exceeded its deadline.
	Timeout,
	/// Provider throttled the caller.
	RateLimit {
		/// Server-provided wait before the next attempt.
		retry_after: Option<StdDuration>,
	},
	/// Provider answered with an unexpected response.
	Api {
		/// Truncated response body, when one was available.
		response: Option<String>,
	},
	/// Requested resource does not exist upstream.
	ResourceNotFound,
	/// Caller lacks permission for the resource.
	PermissionDenied,
	/// Data synchronization failed.
	Sync {
		/// Whether part of the batch was applied before the failure.
		partial: bool,
	},
	/// Webhook payload could not be processed.
	Webhook,
	/// Local configuration or contract violation.
	Configuration,
	/// No provider is registered under the requested identifier.
	ProviderNotFound,
	/// No integration exists under the requested identifier.
	IntegrationNotFound,
}
impl ErrorKind {
	/// Returns the stable error name used in payloads and retry lists.
	pub const fn name(&self) -> &'static str {
		match self {
			Self::Authentication => "AuthenticationError",
			Self::TokenExpired => "TokenExpiredError",
			Self::TokenRefresh => "TokenRefreshError",
			Self::InvalidCredentials => "InvalidCredentialsError",
			Self::Network => "NetworkError",
			Self::Timeout => "TimeoutError",
			Self::RateLimit { .. } => "RateLimitError",
			Self::Api { .. } => "ApiError",
			Self::ResourceNotFound => "ResourceNotFoundError",
			Self::PermissionDenied => "PermissionDeniedError",
			Self::Sync { .. } => "SyncError",
			Self::Webhook => "WebhookError",
			Self::Configuration => "ConfigurationError",
			Self::ProviderNotFound => "ProviderNotFoundError",
			Self::IntegrationNotFound => "IntegrationNotFoundError",
		}
	}

	/// Returns the machine-readable error code.
	pub const fn code(&self) -> &'static str {
		match self {
			Self::Authentication => "AUTHENTICATION_ERROR",
			Self::TokenExpired => "TOKEN_EXPIRED",
			Self::TokenRefresh => "TOKEN_REFRESH_ERROR",
			Self::InvalidCredentials => "INVALID_CREDENTIALS",
			Self::Network => "NETWORK_ERROR",
			Self::Timeout => "TIMEOUT_ERROR",
			Self::RateLimit { .. } => "RATE_LIMIT_EXCEEDED",
			Self::Api { .. } => "API_ERROR",
			Self::ResourceNotFound => "RESOURCE_NOT_FOUND",
			Self::PermissionDenied => "PERMISSION_DENIED",
			Self::Sync { .. } => "SYNC_ERROR",
			Self::Webhook => "WEBHOOK_ERROR",
			Self::Configuration => "CONFIGURATION_ERROR",
			Self::ProviderNotFound => "PROVIDER_NOT_FOUND",
			Self::IntegrationNotFound => "INTEGRATION_NOT_FOUND",
		}
	}

	const fn default_status(&self) -> Option<u16> {
		match self {
			Self::Authentication
			| Self::TokenExpired
			| Self::TokenRefresh
			| Self::InvalidCredentials => Some(401),
			Self::Timeout => Some(408),
			Self::RateLimit { .. } => Some(429),
			Self::ResourceNotFound | Self::ProviderNotFound | Self::IntegrationNotFound =>
				Some(404),
			Self::PermissionDenied => Some(403),
			Self::Webhook => Some(400),
			Self::Configuration => Some(500),
			Self::Network | Self::Api { .. } | Self::Sync { .. } => None,
		}
	}

	const fn default_retryable(&self) -> bool {
		matches!(
			self,
			Self::TokenExpired
				| Self::Network
				| Self::Timeout
				| Self::RateLimit { .. }
				| Self::Sync { .. }
		)
	}
}
impl Display for ErrorKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.name())
	}
}

/// Canonical integration error exposed by every public API.
#[derive(Debug, ThisError)]
#[error("{message}")]
pub struct Error {
	kind: ErrorKind,
	message: String,
	provider: Option<ProviderId>,
	status: Option<u16>,
	retryable: bool,
	#[source]
	source: Option<BoxError>,
}
impl Error {
	/// Creates an error of the given kind with the kind's default status and retryability.
	pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
		let status = kind.default_status();
		let retryable = kind.default_retryable();

		Self { kind, message: message.into(), provider: None, status, retryable, source: None }
	}

	/// Credentials were rejected.
	pub fn authentication(message: impl Into<String>) -> Self {
		Self::new(ErrorKind::Authentication, message)
	}

	/// Access token expired and should be refreshed before retrying.
	pub fn token_expired(message: impl Into<String>) -> Self {
		Self::new(ErrorKind::TokenExpired, message)
	}

	/// Refresh-token exchange failed.
	pub fn token_refresh(message: impl Into<String>) -> Self {
		Self::new(ErrorKind::TokenRefresh, message)
	}

	/// Static credentials are malformed or rejected.
	pub fn invalid_credentials(message: impl Into<String>) -> Self {
		Self::new(ErrorKind::InvalidCredentials, message)
	}

	/// Connection-level failure.
	pub fn network(message: impl Into<String>) -> Self {
		Self::new(ErrorKind::Network, message)
	}

	/// Request exceeded its deadline.
	pub fn timeout(message: impl Into<String>) -> Self {
		Self::new(ErrorKind::Timeout, message)
	}

	/// Provider throttled the caller, optionally advertising a wait.
	pub fn rate_limit(message: impl Into<String>, retry_after: Option<StdDuration>) -> Self {
		Self::new(ErrorKind::RateLimit { retry_after }, message)
	}

	/// Unexpected provider response; retryable only for 5xx statuses.
	pub fn api(message: impl Into<String>, status: Option<u16>, response: Option<String>) -> Self {
		let response = response.map(truncate_preview);
		let mut err = Self::new(ErrorKind::Api { response }, message);

		err.status = status;
		err.retryable = status.is_some_and(|code| code >= 500);

		err
	}

	/// Requested resource does not exist upstream.
	pub fn resource_not_found(message: impl Into<String>) -> Self {
		Self::new(ErrorKind::ResourceNotFound, message)
	}

	/// Caller lacks permission for the resource.
	pub fn permission_denied(message: impl Into<String>) -> Self {
		Self::new(ErrorKind::PermissionDenied, message)
	}

	/// Synchronization failed, possibly after partially applying changes.
	pub fn sync(message: impl Into<String>, partial: bool) -> Self {
		Self::new(ErrorKind::Sync { partial }, message)
	}

	/// Webhook payload could not be processed.
	pub fn webhook(message: impl Into<String>) -> Self {
		Self::new(ErrorKind::Webhook, message)
	}

	/// Local configuration or contract violation.
	pub fn configuration(message: impl Into<String>) -> Self {
		Self::new(ErrorKind::Configuration, message)
	}

	/// No provider is registered under `provider`.
	pub fn provider_not_found(provider: &str) -> Self {
		Self::new(ErrorKind::ProviderNotFound, format!("Provider `{provider}` is not registered."))
	}

	/// No integration exists under `integration`.
	pub fn integration_not_found(integration: &str) -> Self {
		Self::new(
			ErrorKind::IntegrationNotFound,
			format!("Integration `{integration}` was not found."),
		)
	}

	/// Classifies an HTTP status returned by a provider API.
	pub fn from_status(
		status: u16,
		retry_after: Option<StdDuration>,
		body: Option<String>,
	) -> Self {
		let err = match status {
			401 => Self::authentication("Provider rejected the request credentials."),
			403 => Self::permission_denied("Provider denied access to the resource."),
			404 => Self::resource_not_found("Provider resource was not found."),
			408 => Self::timeout("Provider timed out while handling the request."),
			429 => Self::rate_limit("Provider rate limit exceeded.", retry_after),
			code => return Self::api(format!("Provider returned HTTP {code}."), Some(code), body),
		};

		err.with_status(status)
	}

	/// Attaches the provider identifier.
	pub fn with_provider(mut self, provider: ProviderId) -> Self {
		self.provider = Some(provider);

		self
	}

	/// Overrides the HTTP status code.
	pub fn with_status(mut self, status: u16) -> Self {
		self.status = Some(status);

		self
	}

	/// Attaches the underlying cause.
	pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
		self.source = Some(source.into());

		self
	}

	/// Error category.
	pub fn kind(&self) -> &ErrorKind {
		&self.kind
	}

	/// Stable error name (`RateLimitError`, `ApiError`, ...).
	pub fn name(&self) -> &'static str {
		self.kind.name()
	}

	/// Machine-readable error code.
	pub fn code(&self) -> &'static str {
		self.kind.code()
	}

	/// Human-readable message for logs.
	pub fn message(&self) -> &str {
		&self.message
	}

	/// Provider that produced the failure, if known.
	pub fn provider(&self) -> Option<&ProviderId> {
		self.provider.as_ref()
	}

	/// HTTP status associated with the failure, if any.
	pub fn status_code(&self) -> Option<u16> {
		self.status
	}

	/// Whether the failure is transient and safe to retry.
	pub fn is_retryable(&self) -> bool {
		self.retryable
	}

	/// Server-advertised wait for rate-limit errors.
	pub fn retry_after(&self) -> Option<StdDuration> {
		match self.kind {
			ErrorKind::RateLimit { retry_after } => retry_after,
			_ => None,
		}
	}

	/// Returns `true` for rate-limit errors.
	pub fn is_rate_limit(&self) -> bool {
		matches!(self.kind, ErrorKind::RateLimit { .. })
	}

	/// Builds the serializable wire representation.
	pub fn payload(&self) -> ErrorPayload {
		let (retry_after, response, partial) = match &self.kind {
			ErrorKind::RateLimit { retry_after } =>
				(retry_after.map(|wait| wait.as_secs_f64()), None, None),
			ErrorKind::Api { response } => (None, response.clone(), None),
			ErrorKind::Sync { partial } => (None, None, Some(*partial)),
			_ => (None, None, None),
		};

		ErrorPayload {
			name: self.name(),
			message: self.message.clone(),
			code: self.code(),
			provider_id: self.provider.as_ref().map(ToString::to_string),
			status_code: self.status,
			retryable: self.retryable,
			cause: self.source.as_ref().map(ToString::to_string),
			retry_after,
			response,
			partial,
		}
	}

	/// Renders [`Error::payload`] as JSON.
	pub fn to_json(&self) -> serde_json::Value {
		serde_json::to_value(self.payload()).unwrap_or(serde_json::Value::Null)
	}

	/// Localized, non-technical message suitable for end users.
	pub fn user_friendly_message(&self, locale: Locale) -> &'static str {
		user_friendly_message(self, locale)
	}
}

/// Wire shape produced by [`Error::payload`].
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
	/// Error name.
	pub name: &'static str,
	/// Error message.
	pub message: String,
	/// Machine-readable code.
	pub code: &'static str,
	/// Provider identifier, when known.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub provider_id: Option<String>,
	/// HTTP status, when known.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub status_code: Option<u16>,
	/// Retryability flag.
	pub retryable: bool,
	/// Rendered cause chain head.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub cause: Option<String>,
	/// Rate-limit wait in seconds.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub retry_after: Option<f64>,
	/// API response preview.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub response: Option<String>,
	/// Partial-sync flag.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub partial: Option<bool>,
}

/// Languages supported by [`user_friendly_message`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Locale {
	/// English.
	#[default]
	English,
	/// Spanish.
	Spanish,
}

/// Normalizes an arbitrary failure into an [`Error`].
///
/// Values that already are an [`Error`] are returned unchanged, so wrapping twice never nests.
/// Everything else is classified by structured inspection (reqwest and I/O errors) and then by
/// message heuristics.
pub fn wrap_error(error: impl Into<BoxError>, provider: Option<&ProviderId>) -> Error {
	let boxed = error.into();
	let boxed = match boxed.downcast::<Error>() {
		Ok(err) => return *err,
		Err(other) => other,
	};
	let mut err = classify(boxed.as_ref()).with_source(boxed);

	if let Some(provider) = provider {
		err = err.with_provider(provider.clone());
	}

	err
}

/// Heuristic used for untyped failures: does the message look like a connection problem?
pub fn is_network_error(message: &str) -> bool {
	let lowered = message.to_ascii_lowercase();

	NETWORK_ERROR_MARKERS.iter().any(|marker| lowered.contains(marker))
}

/// Maps an error to a non-technical message that never leaks provider internals.
pub fn user_friendly_message(error: &Error, locale: Locale) -> &'static str {
	match locale {
		Locale::English => match error.kind() {
			ErrorKind::Authentication | ErrorKind::InvalidCredentials =>
				"We couldn't sign in to the connected service. Please reconnect the integration.",
			ErrorKind::TokenExpired | ErrorKind::TokenRefresh =>
				"Your connection has expired. Please reconnect the integration.",
			ErrorKind::Network => "We couldn't reach the service. Please check your connection.",
			ErrorKind::Timeout => "The service took too long to respond. Please try again.",
			ErrorKind::RateLimit { .. } =>
				"Too many requests were sent. Please wait a moment and try again.",
			ErrorKind::Api { .. } => "The connected service reported a problem. Please try again.",
			ErrorKind::ResourceNotFound => "The requested item could not be found.",
			ErrorKind::PermissionDenied => "You don't have permission to perform this action.",
			ErrorKind::Sync { .. } => "Synchronization did not complete. Please try again.",
			ErrorKind::Webhook => "We couldn't process a notification from the service.",
			ErrorKind::Configuration =>
				"This integration is not configured correctly. Please contact support.",
			ErrorKind::ProviderNotFound => "This integration is not available.",
			ErrorKind::IntegrationNotFound => "This integration is no longer connected.",
		},
		Locale::Spanish => match error.kind() {
			ErrorKind::Authentication | ErrorKind::InvalidCredentials =>
				"No pudimos iniciar sesión en el servicio conectado. Vuelve a conectar la integración.",
			ErrorKind::TokenExpired | ErrorKind::TokenRefresh =>
				"Tu conexión ha caducado. Vuelve a conectar la integración.",
			ErrorKind::Network => "No pudimos contactar con el servicio. Revisa tu conexión.",
			ErrorKind::Timeout => "El servicio tardó demasiado en responder. Inténtalo de nuevo.",
			ErrorKind::RateLimit { .. } =>
				"Se enviaron demasiadas solicitudes. Espera un momento e inténtalo de nuevo.",
			ErrorKind::Api { .. } =>
				"El servicio conectado informó de un problema. Inténtalo de nuevo.",
			ErrorKind::ResourceNotFound => "No se encontró el elemento solicitado.",
			ErrorKind::PermissionDenied => "No tienes permiso para realizar esta acción.",
			ErrorKind::Sync { .. } => "La sincronización no se completó. Inténtalo de nuevo.",
			ErrorKind::Webhook => "No pudimos procesar una notificación del servicio.",
			ErrorKind::Configuration =>
				"Esta integración no está configurada correctamente. Contacta con soporte.",
			ErrorKind::ProviderNotFound => "Esta integración no está disponible.",
			ErrorKind::IntegrationNotFound => "Esta integración ya no está conectada.",
		},
	}
}

fn classify(error: &(dyn StdError + Send + Sync + 'static)) -> Error {
	#[cfg(feature = "reqwest")]
	if let Some(err) = error.downcast_ref::<ReqwestError>() {
		if err.is_timeout() {
			return Error::timeout("Request timed out.");
		}
		if err.is_connect() {
			return Error::network("Connection to the provider failed.");
		}
		if let Some(status) = err.status() {
			return Error::from_status(status.as_u16(), None, None);
		}
	}
	if let Some(err) = error.downcast_ref::<std::io::Error>() {
		use std::io::ErrorKind as IoKind;

		match err.kind() {
			IoKind::TimedOut => return Error::timeout(err.to_string()),
			IoKind::ConnectionReset
			| IoKind::ConnectionRefused
			| IoKind::ConnectionAborted
			| IoKind::NotConnected
			| IoKind::BrokenPipe => return Error::network(err.to_string()),
			_ => {},
		}
	}

	let message = error.to_string();

	classify_message(message)
}

fn classify_message(message: String) -> Error {
	let lowered = message.to_ascii_lowercase();

	if lowered.contains("401") || lowered.contains("unauthorized") {
		Error::authentication(message)
	} else if lowered.contains("429") || lowered.contains("rate limit") {
		Error::rate_limit(message, None)
	} else if lowered.contains("timeout") || lowered.contains("timed out") {
		Error::timeout(message)
	} else if ["ETIMEDOUT", "ECONNRESET", "ENOTFOUND"].iter().any(|code| message.contains(code)) {
		Error::network(message)
	} else {
		let retryable = is_network_error(&message);
		let mut err = Error::api(message, None, None);

		err.retryable = retryable;

		err
	}
}

fn truncate_preview(body: String) -> String {
	if body.chars().count() <= RESPONSE_PREVIEW_LIMIT {
		return body;
	}

	let mut buf: String = body.chars().take(RESPONSE_PREVIEW_LIMIT).collect();

	buf.push('…');

	buf
}
