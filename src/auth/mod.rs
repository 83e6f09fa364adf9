//! Authentication and authorization.
//!
//! `token` issues and verifies the stateless signed credential, `store`
//! owns the user/role directory, and this module holds the request-scoped
//! identity plus the single role gate composed in front of every protected
//! operation.

pub mod store;
pub mod token;

pub use store::UserStore;
pub use token::{CredentialError, CredentialKey};

use serde::{Deserialize, Serialize};

/// Role granting visibility into the user roster.
pub const ROLE_ADMIN: &str = "admin";

/// Baseline role held by every registered account.
pub const ROLE_USER: &str = "user";

/// Identity reconstructed from a verified credential's claims. Exists only
/// for the lifetime of one request; never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionIdentity {
    pub user_id: i64,
    pub email: String,
    pub roles: Vec<String>,
}

impl SessionIdentity {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// The role gate. Authorization is a set-membership check, never a
/// hierarchy: `None` admits any verified identity, `Some(role)` admits only
/// identities holding exactly that role name.
pub fn authorize(identity: &SessionIdentity, required_role: Option<&str>) -> bool {
    match required_role {
        None => true,
        Some(role) => identity.has_role(role),
    }
}
