// Provider trait and the header-based strategies.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use twin_core::{TwinError, TwinResult};

use crate::jwt::JwtProvider;
use crate::options::{AuthMode, AuthOptions};
use crate::user::AuthUser;

/// Request headers as seen by the auth layer: lowercase names, and
/// multi-value headers already collapsed to their first value.
pub type RequestHeaders = HashMap<String, String>;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLES_HEADER: &str = "x-user-roles";

/// Extract a bearer token from the `authorization` header.
pub fn extract_bearer_token(headers: &RequestHeaders) -> Option<String> {
    let v = headers.get("authorization")?.trim();
    let prefix = "Bearer ";
    if v.len() <= prefix.len() || !v.starts_with(prefix) {
        return None;
    }
    Some(v[prefix.len()..].trim().to_string())
}

/// Identify the caller of an incoming request. One provider per
/// engine; the mode is fixed at construction.
pub trait AuthProvider: Send + Sync {
    fn mode(&self) -> AuthMode;

    /// The configured admin role name.
    fn admin_role(&self) -> &str;

    /// Whether the request carries usable credentials for this mode.
    fn has_valid_auth(&self, headers: &RequestHeaders) -> bool;

    /// Identify the user, or None when the credentials are absent or
    /// invalid.
    fn parse_request(&self, headers: &RequestHeaders) -> Option<AuthUser>;

    fn is_admin(&self, user: &AuthUser) -> bool {
        user.has_role(self.admin_role())
    }
}

/// Gateway mode: an upstream proxy authenticated the caller and left
/// `x-user-id` / `x-user-roles` headers behind.
pub struct GatewayProvider {
    admin_role: String,
}

impl GatewayProvider {
    pub fn new(admin_role: impl Into<String>) -> Self {
        Self {
            admin_role: admin_role.into(),
        }
    }
}

impl AuthProvider for GatewayProvider {
    fn mode(&self) -> AuthMode {
        AuthMode::Gateway
    }

    fn admin_role(&self) -> &str {
        &self.admin_role
    }

    fn has_valid_auth(&self, headers: &RequestHeaders) -> bool {
        headers
            .get(USER_ID_HEADER)
            .map(|v| !v.trim().is_empty())
            .unwrap_or(false)
    }

    fn parse_request(&self, headers: &RequestHeaders) -> Option<AuthUser> {
        let id = headers.get(USER_ID_HEADER)?.trim();
        if id.is_empty() {
            return None;
        }

        let roles = headers
            .get(USER_ROLES_HEADER)
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|r| !r.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Some(AuthUser::new(id, roles))
    }
}

/// None mode: authentication disabled, every request is the configured
/// anonymous sentinel.
pub struct NoneProvider {
    anonymous_user_id: String,
    admin_role: String,
}

impl NoneProvider {
    pub fn new(anonymous_user_id: impl Into<String>, admin_role: impl Into<String>) -> Self {
        Self {
            anonymous_user_id: anonymous_user_id.into(),
            admin_role: admin_role.into(),
        }
    }
}

impl AuthProvider for NoneProvider {
    fn mode(&self) -> AuthMode {
        AuthMode::None
    }

    fn admin_role(&self) -> &str {
        &self.admin_role
    }

    fn has_valid_auth(&self, _headers: &RequestHeaders) -> bool {
        true
    }

    fn parse_request(&self, _headers: &RequestHeaders) -> Option<AuthUser> {
        Some(AuthUser::anonymous(self.anonymous_user_id.clone()))
    }
}

/// Construct the provider the options resolve to.
pub fn make_provider(options: &AuthOptions) -> TwinResult<Arc<dyn AuthProvider>> {
    options
        .validate()
        .map_err(|e| TwinError::configuration(e).into_anyhow())?;

    let mode = options.resolved_mode();
    debug!(mode = mode.as_str(), "constructing auth provider");

    Ok(match mode {
        AuthMode::Gateway => Arc::new(GatewayProvider::new(options.admin_role_name.clone())),
        AuthMode::Jwt => Arc::new(JwtProvider::new(
            options.jwt.clone(),
            options.admin_role_name.clone(),
        )?),
        AuthMode::None => Arc::new(NoneProvider::new(
            options.anonymous_user_id.clone(),
            options.admin_role_name.clone(),
        )),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> RequestHeaders {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn gateway_parses_id_and_roles() {
        let provider = GatewayProvider::new("admin");
        let headers = headers(&[
            (USER_ID_HEADER, "u1"),
            (USER_ROLES_HEADER, "editor, admin ,"),
        ]);

        assert!(provider.has_valid_auth(&headers));
        let user = provider.parse_request(&headers).unwrap();
        assert_eq!(user.id, "u1");
        assert_eq!(user.roles, vec!["editor", "admin"]);
        assert!(provider.is_admin(&user));
    }

    #[test]
    fn gateway_rejects_missing_id() {
        let provider = GatewayProvider::new("admin");
        let headers = headers(&[(USER_ROLES_HEADER, "editor")]);
        assert!(!provider.has_valid_auth(&headers));
        assert!(provider.parse_request(&headers).is_none());
    }

    #[test]
    fn gateway_parse_agrees_with_has_valid_auth() {
        let provider = GatewayProvider::new("admin");
        for case in [
            headers(&[]),
            headers(&[(USER_ID_HEADER, "")]),
            headers(&[(USER_ID_HEADER, "u1")]),
            headers(&[(USER_ID_HEADER, "u1"), (USER_ROLES_HEADER, "a,b")]),
        ] {
            assert_eq!(
                provider.parse_request(&case).is_some(),
                provider.has_valid_auth(&case)
            );
        }
    }

    #[test]
    fn none_mode_always_answers_the_sentinel() {
        let provider = NoneProvider::new("anon-7", "admin");
        let empty = headers(&[]);

        assert!(provider.has_valid_auth(&empty));
        let user = provider.parse_request(&empty).unwrap();
        assert_eq!(user.id, "anon-7");
        assert_eq!(user.roles, vec!["anonymous"]);
        assert!(!provider.is_admin(&user));
    }

    #[test]
    fn bearer_extraction() {
        assert_eq!(
            extract_bearer_token(&headers(&[("authorization", "Bearer abc.def.ghi")])),
            Some("abc.def.ghi".to_string())
        );
        assert_eq!(
            extract_bearer_token(&headers(&[("authorization", "Basic xyz")])),
            None
        );
        assert_eq!(extract_bearer_token(&headers(&[])), None);
    }

    #[test]
    fn factory_respects_disable_auth() {
        let options = AuthOptions {
            mode: Some(crate::options::AuthMode::Gateway),
            disable_auth: true,
            ..AuthOptions::default()
        };
        let provider = make_provider(&options).unwrap();
        assert_eq!(provider.mode(), AuthMode::None);
    }
}
