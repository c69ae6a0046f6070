// User reconciliation against the record store.

use std::sync::Arc;

use chrono::Utc;

use twin_core::TwinResult;
use twin_store::{User, UserStore};

use crate::user::AuthUser;

/// Resolves authenticated identities to stored users.
///
/// On every authenticated request the presented role set replaces the
/// stored one (the store's `reconcile` runs that as one transaction).
/// With auth disabled the directory answers a stable mock user and
/// never touches the store.
pub struct UserDirectory {
    store: Arc<dyn UserStore>,
    disabled: bool,
    anonymous_user_id: String,
}

impl UserDirectory {
    pub fn new(store: Arc<dyn UserStore>) -> Self {
        Self {
            store,
            disabled: false,
            anonymous_user_id: "anonymous".to_string(),
        }
    }

    pub fn disabled(store: Arc<dyn UserStore>, anonymous_user_id: impl Into<String>) -> Self {
        Self {
            store,
            disabled: true,
            anonymous_user_id: anonymous_user_id.into(),
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    pub async fn resolve(&self, auth_user: &AuthUser) -> TwinResult<User> {
        if self.disabled {
            let now = Utc::now();
            return Ok(User {
                id: 0,
                external_id: self.anonymous_user_id.clone(),
                created_at: now,
                updated_at: now,
                roles: auth_user.roles.clone(),
            });
        }

        self.store.reconcile(&auth_user.id, &auth_user.roles).await
    }
}
