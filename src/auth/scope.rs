//! Ordered OAuth scope lists.

// std
use std::slice::Iter;
// self
use crate::_prelude::*;

/// Errors emitted when validating scopes.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum ScopeValidationError {
	/// Empty scope entries are not allowed.
	#[error("Scope entries cannot be empty.")]
	Empty,
	/// Scopes cannot contain embedded whitespace characters.
	#[error("Scope contains whitespace: {scope}.")]
	ContainsWhitespace {
		/// The offending scope string.
		scope: String,
	},
}
impl From<ScopeValidationError> for Error {
	fn from(e: ScopeValidationError) -> Self {
		Error::configuration(e.to_string()).with_source(e)
	}
}

/// Deduplicated scope list that keeps the order in which scopes were declared.
///
/// Providers render scopes in the authorize URL in declaration order, so the set is backed by a
/// `Vec` rather than a sorted collection. Equality is order-insensitive.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct ScopeSet(Vec<String>);
impl ScopeSet {
	/// Validates and deduplicates `scopes`.
	pub fn new<I, S>(scopes: I) -> Result<Self, ScopeValidationError>
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		let mut out = Vec::new();

		for scope in scopes {
			let scope = scope.into();

			if scope.is_empty() {
				return Err(ScopeValidationError::Empty);
			}
			if scope.chars().any(char::is_whitespace) {
				return Err(ScopeValidationError::ContainsWhitespace { scope });
			}
			if !out.contains(&scope) {
				out.push(scope);
			}
		}

		Ok(Self(out))
	}

	/// Parses a provider-formatted scope string split on `delimiter` (and whitespace).
	pub fn from_delimited(raw: &str, delimiter: char) -> Self {
		let mut out: Vec<String> = Vec::new();

		for scope in raw.split(|ch: char| ch == delimiter || ch.is_whitespace()) {
			if !scope.is_empty() && !out.iter().any(|known| known == scope) {
				out.push(scope.to_owned());
			}
		}

		Self(out)
	}

	/// Number of distinct scopes.
	pub fn len(&self) -> usize {
		self.0.len()
	}

	/// Returns `true` if no scopes are defined.
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	/// Returns `true` if `scope` is part of the set.
	pub fn contains(&self, scope: &str) -> bool {
		self.0.iter().any(|known| known == scope)
	}

	/// Iterates over the scopes in declaration order.
	pub fn iter(&self) -> Iter<'_, String> {
		self.0.iter()
	}

	/// Joins the scopes with the provider's delimiter.
	pub fn join(&self, delimiter: char) -> String {
		let mut buf = String::new();

		for (idx, scope) in self.0.iter().enumerate() {
			if idx > 0 {
				buf.push(delimiter);
			}

			buf.push_str(scope);
		}

		buf
	}
}
impl PartialEq for ScopeSet {
	fn eq(&self, other: &Self) -> bool {
		self.len() == other.len() && self.0.iter().all(|scope| other.contains(scope))
	}
}
impl Eq for ScopeSet {}
impl Debug for ScopeSet {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("ScopeSet").field(&self.0).finish()
	}
}
impl Display for ScopeSet {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(&self.join(' '))
	}
}
impl TryFrom<Vec<String>> for ScopeSet {
	type Error = ScopeValidationError;

	fn try_from(value: Vec<String>) -> Result<Self, Self::Error> {
		Self::new(value)
	}
}
impl From<ScopeSet> for Vec<String> {
	fn from(value: ScopeSet) -> Self {
		value.0
	}
}
impl<'a> IntoIterator for &'a ScopeSet {
	type IntoIter = Iter<'a, String>;
	type Item = &'a String;

	fn into_iter(self) -> Self::IntoIter {
		self.0.iter()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn keeps_declaration_order_and_drops_duplicates() {
		let scopes = ScopeSet::new(["calendar.read", "openid", "calendar.read"])
			.expect("Scope fixture should be valid.");

		assert_eq!(scopes.len(), 2);
		assert_eq!(scopes.join(' '), "calendar.read openid");
		assert_eq!(scopes.join(','), "calendar.read,openid");
	}

	#[test]
	fn equality_ignores_order() {
		let lhs = ScopeSet::new(["a", "b"]).expect("Left fixture should be valid.");
		let rhs = ScopeSet::new(["b", "a"]).expect("Right fixture should be valid.");

		assert_eq!(lhs, rhs);
	}

	#[test]
	fn rejects_invalid_entries() {
		assert_eq!(ScopeSet::new([""]), Err(ScopeValidationError::Empty));
		assert!(matches!(
			ScopeSet::new(["chat write"]),
			Err(ScopeValidationError::ContainsWhitespace { .. })
		));
	}

	#[test]
	fn parses_provider_strings() {
		let scopes = ScopeSet::from_delimited("users:read,chat:write  users:read", ',');

		assert_eq!(scopes.iter().map(String::as_str).collect::<Vec<_>>(), [
			"users:read",
			"chat:write"
		]);
	}
}
