use serde::{Deserialize, Serialize};

/// The identity extracted from a request, before reconciliation with
/// the record store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    /// External id: gateway header value, JWT subject, or the
    /// configured anonymous id.
    pub id: String,
    pub roles: Vec<String>,
}

impl AuthUser {
    pub fn new(id: impl Into<String>, roles: Vec<String>) -> Self {
        Self {
            id: id.into(),
            roles,
        }
    }

    pub fn anonymous(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            roles: vec!["anonymous".to_string()],
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}
