use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use twin_core::TwinResult;

/// A reconciled user: the stored row with its current role set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub external_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub roles: Vec<String>,
}

impl User {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// The user/role triad behind authenticated requests.
///
/// `reconcile` is the workhorse: it lazily inserts the user on first
/// sight and replaces the stored role set with the presented one in a
/// single transaction (insert absent roles into the master list,
/// drop the user's links, relink, bump `updated_at`).
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_external_id(&self, external_id: &str) -> TwinResult<Option<User>>;

    async fn reconcile(&self, external_id: &str, roles: &[String]) -> TwinResult<User>;
}
