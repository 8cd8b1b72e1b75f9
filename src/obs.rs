//! Structured logging plus optional tracing and metrics hooks.
//!
//! # Feature Flags
//!
//! - `tracing` (default): [`OperationSpan`] emits spans named `integration_hub.operation` with
//!   `operation` and `provider` fields, and [`TracingSink`] forwards log entries as events.
//! - `metrics`: increments `integration_hub_operation_total{operation,outcome}`,
//!   `integration_hub_retry_total{provider}` and `integration_hub_throttle_wait_total{provider}`.

mod logger;
mod metrics;
mod tracing;

pub use logger::*;
pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Operations observed by the crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
	/// Provider binding to an integration config.
	Initialize,
	/// Provider health probe.
	CheckConnection,
	/// Provider API request.
	Request,
	/// Provider teardown.
	Disconnect,
	/// Authorization-code exchange.
	CodeExchange,
	/// Refresh-token exchange.
	TokenRefresh,
	/// Token revocation.
	TokenRevoke,
}
impl Operation {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Operation::Initialize => "initialize",
			Operation::CheckConnection => "check_connection",
			Operation::Request => "request",
			Operation::Disconnect => "disconnect",
			Operation::CodeExchange => "code_exchange",
			Operation::TokenRefresh => "token_refresh",
			Operation::TokenRevoke => "token_revoke",
		}
	}
}
impl Display for Operation {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Outcome {
	/// Entry to an operation.
	Attempt,
	/// Successful completion.
	Success,
	/// Failure propagated back to the caller.
	Failure,
}
impl Outcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Outcome::Attempt => "attempt",
			Outcome::Success => "success",
			Outcome::Failure => "failure",
		}
	}

	/// Maps a result onto its outcome label.
	pub fn of<T>(result: &Result<T>) -> Self {
		if result.is_ok() { Outcome::Success } else { Outcome::Failure }
	}
}
impl Display for Outcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
