//! Validated identifiers for tenants, users, providers, and installed integrations.
//!
//! Every in-memory cache and bucket in the crate is keyed by one of these types, so
//! cross-tenant isolation depends on them never being built from unchecked strings.

// std
use std::{borrow::Borrow, ops::Deref};
// self
use crate::_prelude::*;

const IDENTIFIER_MAX_LEN: usize = 128;

macro_rules! def_id {
	($name:ident, $kind:literal, $doc:literal) => {
		#[doc = $doc]
		#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
		#[serde(try_from = "String", into = "String")]
		pub struct $name(String);
		impl $name {
			/// Validates and wraps the identifier.
			pub fn new(value: impl Into<String>) -> Result<Self, IdentifierError> {
				let value = value.into();

				check($kind, &value)?;

				Ok(Self(value))
			}

			/// Borrows the identifier as a string slice.
			pub fn as_str(&self) -> &str {
				&self.0
			}
		}
		impl Deref for $name {
			type Target = str;

			fn deref(&self) -> &str {
				&self.0
			}
		}
		impl AsRef<str> for $name {
			fn as_ref(&self) -> &str {
				&self.0
			}
		}
		impl Borrow<str> for $name {
			fn borrow(&self) -> &str {
				&self.0
			}
		}
		impl From<$name> for String {
			fn from(value: $name) -> Self {
				value.0
			}
		}
		impl TryFrom<String> for $name {
			type Error = IdentifierError;

			fn try_from(value: String) -> Result<Self, IdentifierError> {
				Self::new(value)
			}
		}
		impl FromStr for $name {
			type Err = IdentifierError;

			fn from_str(s: &str) -> Result<Self, IdentifierError> {
				Self::new(s)
			}
		}
		impl Debug for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				write!(f, "{}({})", $kind, self.0)
			}
		}
		impl Display for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				f.write_str(&self.0)
			}
		}
	};
}

def_id! { TenantId, "Tenant", "Company (tenant) that owns installed integrations." }
def_id! { UserId, "User", "User within a tenant who connected an integration." }
def_id! { ProviderId, "Provider", "Third-party provider type, e.g. a calendar vendor." }
def_id! { IntegrationId, "Integration", "One tenant's installed instance of a provider." }

/// Error returned when identifier validation fails.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum IdentifierError {
	/// The identifier was empty.
	#[error("{kind} identifier cannot be empty.")]
	Empty {
		/// Identifier kind.
		kind: &'static str,
	},
	/// The identifier contains whitespace or control characters.
	#[error("{kind} identifier contains whitespace or control characters.")]
	InvalidCharacter {
		/// Identifier kind.
		kind: &'static str,
	},
	/// The identifier exceeded the allowed length.
	#[error("{kind} identifier exceeds {max} bytes.")]
	TooLong {
		/// Identifier kind.
		kind: &'static str,
		/// Maximum permitted length in bytes.
		max: usize,
	},
}
impl From<IdentifierError> for Error {
	fn from(e: IdentifierError) -> Self {
		Error::configuration(e.to_string()).with_source(e)
	}
}

fn check(kind: &'static str, value: &str) -> Result<(), IdentifierError> {
	if value.is_empty() {
		return Err(IdentifierError::Empty { kind });
	}
	if value.chars().any(|ch| ch.is_whitespace() || ch.is_control()) {
		return Err(IdentifierError::InvalidCharacter { kind });
	}
	if value.len() > IDENTIFIER_MAX_LEN {
		return Err(IdentifierError::TooLong { kind, max: IDENTIFIER_MAX_LEN });
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn rejects_blank_spaced_and_oversized_values() {
		assert_eq!(TenantId::new(""), Err(IdentifierError::Empty { kind: "Tenant" }));
		assert!(ProviderId::new("google calendar").is_err());
		assert!(IntegrationId::new("int\u{0007}").is_err());
		assert!(UserId::new("a".repeat(IDENTIFIER_MAX_LEN)).is_ok());
		assert!(UserId::new("a".repeat(IDENTIFIER_MAX_LEN + 1)).is_err());
	}

	#[test]
	fn deserialization_goes_through_validation() {
		let id: IntegrationId =
			serde_json::from_str("\"int-42\"").expect("Valid identifier should deserialize.");

		assert_eq!(id.as_str(), "int-42");
		assert!(serde_json::from_str::<IntegrationId>("\"int 42\"").is_err());
	}

	#[test]
	fn maps_look_up_by_str() {
		let map = HashMap::from([(
			ProviderId::new("slack").expect("Provider fixture should be valid."),
			1_u8,
		)]);

		assert_eq!(map.get("slack"), Some(&1));
		assert_eq!(format!("{:?}", ProviderId::new("slack").ok()), "Some(Provider(slack))");
	}
}
