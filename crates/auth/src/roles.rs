use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Role identifier carried in tokens.
///
/// Roles are opaque strings; only [`Role::ADMIN`] and [`Role::PRIVILEGED`]
/// carry meaning for the feedback pipeline (see `AuthContext::resolve`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(Cow<'static, str>);

impl Role {
    /// Operators: full job detail, retry, purge.
    pub const ADMIN: Role = Role(Cow::Borrowed("admin"));
    /// Paying / elevated accounts: submissions get elevated priority.
    pub const PRIVILEGED: Role = Role(Cow::Borrowed("privileged"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
