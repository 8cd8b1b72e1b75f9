//! Identifiers, scopes, secrets, PKCE material, and OAuth token models.

pub mod id;
pub mod pkce;
pub mod scope;
pub mod secret;
pub mod tokens;

pub use id::*;
pub use pkce::*;
pub use scope::*;
pub use secret::*;
pub use tokens::*;
