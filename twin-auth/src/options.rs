// Authentication options and configuration.

use serde::{Deserialize, Serialize};

use twin_core::env_flag;

/// The three provider modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// Trust identity headers set by an upstream gateway.
    Gateway,
    /// Verify bearer tokens locally.
    Jwt,
    /// No authentication; every request is the anonymous sentinel.
    None,
}

impl AuthMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gateway" => Some(AuthMode::Gateway),
            "jwt" => Some(AuthMode::Jwt),
            "none" => Some(AuthMode::None),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMode::Gateway => "gateway",
            AuthMode::Jwt => "jwt",
            AuthMode::None => "none",
        }
    }
}

/// JWT signing algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JwtAlgorithm {
    HS256,
    HS384,
    HS512,
    RS256,
    RS384,
    RS512,
    ES256,
    ES384,
}

impl Default for JwtAlgorithm {
    fn default() -> Self {
        Self::HS256
    }
}

impl JwtAlgorithm {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "HS256" => Some(Self::HS256),
            "HS384" => Some(Self::HS384),
            "HS512" => Some(Self::HS512),
            "RS256" => Some(Self::RS256),
            "RS384" => Some(Self::RS384),
            "RS512" => Some(Self::RS512),
            "ES256" => Some(Self::ES256),
            "ES384" => Some(Self::ES384),
            _ => None,
        }
    }

    pub fn is_hmac(&self) -> bool {
        matches!(self, Self::HS256 | Self::HS384 | Self::HS512)
    }
}

/// JWT-specific configuration options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwtOptions {
    pub algorithm: JwtAlgorithm,
    /// Shared secret for HMAC algorithms.
    pub secret: Option<String>,
    /// PEM public key for RSA/ECDSA algorithms.
    pub public_key: Option<String>,
    pub issuer: Option<String>,
    pub audience: Option<String>,
    /// Dotted path into the claims for the user id. Default `sub`.
    pub user_id_claim: String,
    /// Dotted path into the claims for the roles. Default
    /// `realm_access.roles`, which is also the fallback when the
    /// configured path is absent.
    pub roles_claim: String,
}

impl JwtOptions {
    pub const DEFAULT_USER_ID_CLAIM: &'static str = "sub";
    pub const DEFAULT_ROLES_CLAIM: &'static str = "realm_access.roles";

    pub fn validate(&self) -> Result<(), String> {
        if self.algorithm.is_hmac() {
            if self.secret.as_deref().map_or(true, str::is_empty) {
                return Err("HMAC algorithms require JWT_SECRET".to_string());
            }
        } else if self.public_key.as_deref().map_or(true, str::is_empty) {
            return Err("RSA/ECDSA algorithms require JWT_PUBLIC_KEY".to_string());
        }
        Ok(())
    }
}

/// Main authentication configuration.
///
/// Mode selection precedence: explicit `mode`, then the `AUTH_MODE`
/// environment value, then the gateway default. `DISABLE_AUTH` forces
/// `none` regardless of mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthOptions {
    pub mode: Option<AuthMode>,
    pub disable_auth: bool,
    pub anonymous_user_id: String,
    pub admin_role_name: String,
    pub jwt: JwtOptions,
}

impl Default for AuthOptions {
    fn default() -> Self {
        Self {
            mode: None,
            disable_auth: false,
            anonymous_user_id: "anonymous".to_string(),
            admin_role_name: "admin".to_string(),
            jwt: JwtOptions {
                user_id_claim: JwtOptions::DEFAULT_USER_ID_CLAIM.to_string(),
                roles_claim: JwtOptions::DEFAULT_ROLES_CLAIM.to_string(),
                ..JwtOptions::default()
            },
        }
    }
}

impl AuthOptions {
    /// Load from the stable environment contract.
    pub fn from_env() -> Self {
        let mut options = Self::default();

        options.mode = std::env::var("AUTH_MODE").ok().and_then(|v| AuthMode::parse(&v));
        options.disable_auth = env_flag("DISABLE_AUTH");
        if let Ok(v) = std::env::var("ANONYMOUS_USER_ID") {
            if !v.trim().is_empty() {
                options.anonymous_user_id = v;
            }
        }
        if let Ok(v) = std::env::var("ADMIN_ROLE_NAME") {
            if !v.trim().is_empty() {
                options.admin_role_name = v;
            }
        }

        if let Ok(v) = std::env::var("JWT_ALGORITHM") {
            if let Some(alg) = JwtAlgorithm::parse(&v) {
                options.jwt.algorithm = alg;
            }
        }
        options.jwt.secret = std::env::var("JWT_SECRET").ok().filter(|v| !v.is_empty());
        options.jwt.public_key = std::env::var("JWT_PUBLIC_KEY")
            .ok()
            .filter(|v| !v.is_empty());
        options.jwt.issuer = std::env::var("JWT_ISSUER").ok().filter(|v| !v.is_empty());
        options.jwt.audience = std::env::var("JWT_AUDIENCE").ok().filter(|v| !v.is_empty());
        if let Ok(v) = std::env::var("JWT_USER_ID_CLAIM") {
            if !v.trim().is_empty() {
                options.jwt.user_id_claim = v;
            }
        }
        if let Ok(v) = std::env::var("JWT_ROLES_CLAIM") {
            if !v.trim().is_empty() {
                options.jwt.roles_claim = v;
            }
        }

        options
    }

    pub fn with_mode(mut self, mode: AuthMode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// The mode the provider will actually run in.
    pub fn resolved_mode(&self) -> AuthMode {
        if self.disable_auth {
            return AuthMode::None;
        }
        self.mode.unwrap_or(AuthMode::Gateway)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.admin_role_name.trim().is_empty() {
            return Err("ADMIN_ROLE_NAME must not be empty".to_string());
        }
        if self.resolved_mode() == AuthMode::Jwt {
            self.jwt.validate()?;
        }
        Ok(())
    }
}
