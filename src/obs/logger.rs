//! Contextual, secret-redacting logger.
//!
//! Every entry carries the logger's context map (provider, integration, tenant, plus whatever a
//! caller attached) merged with per-call fields. Secret-bearing keys are replaced with
//! [`REDACTED`] at any depth before the entry reaches a [`LogSink`].

// crates.io
use serde_json::{Map, Value};
// self
use crate::{_prelude::*, auth::REDACTED};

const SENSITIVE_MARKERS: [&str; 8] = [
	"secret",
	"password",
	"authorization",
	"authcode",
	"apikey",
	"verifier",
	"cookie",
	"credential",
];

/// Severity of a [`LogEntry`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
	/// Verbose diagnostics.
	Debug,
	/// Normal operation.
	Info,
	/// Degraded but recoverable.
	Warn,
	/// Failed operation.
	Error,
}

/// One structured log record.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LogEntry {
	/// Severity.
	pub level: LogLevel,
	/// Human-readable message.
	pub message: String,
	/// Redacted context.
	pub context: Map<String, Value>,
	/// Emission time.
	#[serde(with = "time::serde::rfc3339")]
	pub timestamp: OffsetDateTime,
}
impl LogEntry {
	/// Renders the entry as a single JSON line.
	pub fn to_json(&self) -> String {
		serde_json::to_string(self).unwrap_or_else(|_| format!("{{\"message\":{:?}}}", self.message))
	}
}

/// Destination for log entries.
pub trait LogSink
where
	Self: Send + Sync,
{
	/// Consumes one entry.
	fn write(&self, entry: LogEntry);
}

/// Forwards entries to `tracing` as events carrying the JSON-rendered entry.
#[cfg(feature = "tracing")]
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;
#[cfg(feature = "tracing")]
impl LogSink for TracingSink {
	fn write(&self, entry: LogEntry) {
		let json = entry.to_json();

		match entry.level {
			LogLevel::Debug => {
				::tracing::debug!(target: "integration_hub", entry = %json, "{}", entry.message)
			},
			LogLevel::Info => {
				::tracing::info!(target: "integration_hub", entry = %json, "{}", entry.message)
			},
			LogLevel::Warn => {
				::tracing::warn!(target: "integration_hub", entry = %json, "{}", entry.message)
			},
			LogLevel::Error => {
				::tracing::error!(target: "integration_hub", entry = %json, "{}", entry.message)
			},
		}
	}
}

/// Keeps entries in memory for inspection.
#[derive(Debug, Default)]
pub struct MemorySink(Mutex<Vec<LogEntry>>);
impl MemorySink {
	/// Snapshot of captured entries.
	pub fn entries(&self) -> Vec<LogEntry> {
		self.0.lock().clone()
	}

	/// Drops captured entries.
	pub fn clear(&self) {
		self.0.lock().clear();
	}
}
impl LogSink for MemorySink {
	fn write(&self, entry: LogEntry) {
		self.0.lock().push(entry);
	}
}

/// Discards every entry.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSink;
impl LogSink for NoopSink {
	fn write(&self, _: LogEntry) {}
}

/// Sink used when none is configured: [`TracingSink`] with the `tracing` feature, otherwise
/// [`NoopSink`].
pub fn default_sink() -> Arc<dyn LogSink> {
	#[cfg(feature = "tracing")]
	{
		Arc::new(TracingSink)
	}
	#[cfg(not(feature = "tracing"))]
	{
		Arc::new(NoopSink)
	}
}

/// Logger scoped to a context map.
#[derive(Clone)]
pub struct IntegrationLogger {
	sink: Arc<dyn LogSink>,
	context: Map<String, Value>,
}
impl IntegrationLogger {
	/// Creates a logger without context.
	pub fn new(sink: Arc<dyn LogSink>) -> Self {
		Self { sink, context: Map::new() }
	}

	/// Returns a child logger with `key` added to the context.
	pub fn with_context(&self, key: impl Into<String>, value: impl Into<Value>) -> Self {
		let mut child = self.clone();

		child.context.insert(key.into(), value.into());

		child
	}

	/// Current (unredacted) context.
	pub fn context(&self) -> &Map<String, Value> {
		&self.context
	}

	/// Logs at debug level.
	pub fn debug(&self, message: impl Into<String>, fields: Value) {
		self.log(LogLevel::Debug, message, fields);
	}

	/// Logs at info level.
	pub fn info(&self, message: impl Into<String>, fields: Value) {
		self.log(LogLevel::Info, message, fields);
	}

	/// Logs at warn level.
	pub fn warn(&self, message: impl Into<String>, fields: Value) {
		self.log(LogLevel::Warn, message, fields);
	}

	/// Logs at error level.
	pub fn error(&self, message: impl Into<String>, fields: Value) {
		self.log(LogLevel::Error, message, fields);
	}

	/// Logs a failure with the error's wire payload under `error`.
	pub fn failure(&self, message: impl Into<String>, error: &Error) {
		let mut fields = Map::new();

		fields.insert("error".into(), error.to_json());

		self.log(LogLevel::Error, message, Value::Object(fields));
	}

	/// Writes one entry; `fields` objects are merged into the context, other values land under
	/// `data`.
	pub fn log(&self, level: LogLevel, message: impl Into<String>, fields: Value) {
		let mut context = self.context.clone();

		match fields {
			Value::Null => {},
			Value::Object(map) => context.extend(map),
			other => {
				context.insert("data".into(), other);
			},
		}

		let context = match redact(Value::Object(context)) {
			Value::Object(map) => map,
			_ => Map::new(),
		};

		self.sink.write(LogEntry {
			level,
			message: message.into(),
			context,
			timestamp: OffsetDateTime::now_utc(),
		});
	}

	/// Runs `fut`, logging its start at debug and its outcome with `duration_ms`.
	pub async fn measure<T, F>(&self, operation: &str, fut: F) -> Result<T>
	where
		F: Future<Output = Result<T>>,
	{
		let started = tokio::time::Instant::now();

		self.debug(format!("Starting {operation}."), Value::Null);

		let result = fut.await;
		let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
		let mut fields = Map::new();

		fields.insert("operation".into(), operation.into());
		fields.insert("duration_ms".into(), duration_ms.into());

		match &result {
			Ok(_) => self.info(format!("Completed {operation}."), Value::Object(fields)),
			Err(e) => {
				fields.insert("error".into(), e.to_json());

				self.error(format!("Failed {operation}."), Value::Object(fields));
			},
		}

		result
	}
}
impl Debug for IntegrationLogger {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("IntegrationLogger").field("context", &self.context).finish_non_exhaustive()
	}
}

/// Replaces secret-bearing values with [`REDACTED`] at any depth.
pub fn redact(value: Value) -> Value {
	match value {
		Value::Object(map) => Value::Object(
			map.into_iter()
				.map(|(key, value)| {
					let value =
						if is_sensitive_key(&key) { Value::from(REDACTED) } else { redact(value) };

					(key, value)
				})
				.collect(),
		),
		Value::Array(items) => Value::Array(items.into_iter().map(redact).collect()),
		other => other,
	}
}

/// Returns `true` when a context key names a credential.
pub fn is_sensitive_key(key: &str) -> bool {
	let normalized =
		key.chars().filter(|ch| ch.is_ascii_alphanumeric()).collect::<String>().to_ascii_lowercase();

	normalized.ends_with("token")
		|| SENSITIVE_MARKERS.iter().any(|marker| normalized.contains(marker))
}

#[cfg(test)]
mod tests {
	// crates.io
	use serde_json::json;
	// self
	use super::*;

	fn logger() -> (IntegrationLogger, Arc<MemorySink>) {
		let sink = Arc::new(MemorySink::default());
		let logger = IntegrationLogger::new(sink.clone())
			.with_context("provider", "calendar")
			.with_context("tenant", "acme");

		(logger, sink)
	}

	#[test]
	fn secrets_are_redacted_at_any_depth() {
		let (logger, sink) = logger();

		logger.info(
			"Token stored.",
			json!({
				"access_token": "ya29.secret",
				"headers": { "Authorization": "Bearer abc", "accept": "json" },
				"attempts": [{ "clientSecret": "s3" }],
				"token_type": "Bearer",
				"refresh_count": 2,
			}),
		);

		let entry = sink.entries().pop().expect("One entry should be captured.");
		let rendered = entry.to_json();

		assert_eq!(entry.context["access_token"], REDACTED);
		assert_eq!(entry.context["headers"]["Authorization"], REDACTED);
		assert_eq!(entry.context["headers"]["accept"], "json");
		assert_eq!(entry.context["attempts"][0]["clientSecret"], REDACTED);
		assert_eq!(entry.context["token_type"], "Bearer");
		assert_eq!(entry.context["refresh_count"], 2);
		assert_eq!(entry.context["provider"], "calendar");
		assert!(!rendered.contains("ya29"));
		assert!(rendered.contains("\"level\":\"info\""));
	}

	#[test]
	fn sensitive_keys_cover_common_spellings() {
		for key in [
			"refreshToken",
			"api_key",
			"X-Api-Key",
			"password",
			"code_verifier",
			"Cookie",
			"authorization_code",
			"auth_code",
		] {
			assert!(is_sensitive_key(key), "{key} should be sensitive");
		}
		for key in ["provider", "expires_at", "token_type", "status", "code"] {
			assert!(!is_sensitive_key(key), "{key} should not be sensitive");
		}
	}

	#[tokio::test(start_paused = true)]
	async fn measure_records_duration_and_failures() {
		let (logger, sink) = logger();
		let ok = logger
			.measure("sync", async {
				tokio::time::sleep(StdDuration::from_millis(250)).await;

				Ok(7)
			})
			.await
			.expect("Measured future should succeed.");

		assert_eq!(ok, 7);

		let entries = sink.entries();

		assert_eq!(entries[0].level, LogLevel::Debug);
		assert_eq!(entries[1].level, LogLevel::Info);
		assert_eq!(entries[1].context["duration_ms"], 250);

		sink.clear();

		let err = logger
			.measure::<(), _>("sync", async { Err(Error::network("reset")) })
			.await
			.expect_err("Measured failure should propagate.");

		assert_eq!(err.name(), "NetworkError");

		let last = sink.entries().pop().expect("Failure entry should be captured.");

		assert_eq!(last.level, LogLevel::Error);
		assert_eq!(last.context["error"]["code"], "NETWORK_ERROR");
	}
}
