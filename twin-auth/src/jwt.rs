// JWT strategy.

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde_json::Value;
use tracing::debug;

use twin_core::{TwinError, TwinResult};

use crate::options::{AuthMode, JwtAlgorithm, JwtOptions};
use crate::provider::{extract_bearer_token, AuthProvider, RequestHeaders};
use crate::user::AuthUser;

fn algorithm(alg: JwtAlgorithm) -> Algorithm {
    match alg {
        JwtAlgorithm::HS256 => Algorithm::HS256,
        JwtAlgorithm::HS384 => Algorithm::HS384,
        JwtAlgorithm::HS512 => Algorithm::HS512,
        JwtAlgorithm::RS256 => Algorithm::RS256,
        JwtAlgorithm::RS384 => Algorithm::RS384,
        JwtAlgorithm::RS512 => Algorithm::RS512,
        JwtAlgorithm::ES256 => Algorithm::ES256,
        JwtAlgorithm::ES384 => Algorithm::ES384,
    }
}

/// Walk a dotted path (e.g. `realm_access.roles`) into the claims.
fn claim_path<'a>(claims: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = claims;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

/// Roles claims come as an array of strings or a single string.
fn roles_from_value(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(str::to_string)
            .collect(),
        Value::String(s) => vec![s.clone()],
        _ => Vec::new(),
    }
}

/// JWT mode: verify bearer tokens locally against a shared secret
/// (HS*) or a PEM public key (RS*/ES*). Signature, issuer, audience,
/// and expiry are all enforced by the validation.
pub struct JwtProvider {
    options: JwtOptions,
    decoding_key: DecodingKey,
    validation: Validation,
    admin_role: String,
}

impl JwtProvider {
    pub fn new(options: JwtOptions, admin_role: impl Into<String>) -> TwinResult<Self> {
        let decoding_key = if options.algorithm.is_hmac() {
            let secret = options.secret.as_deref().ok_or_else(|| {
                TwinError::configuration("JWT_SECRET is required for HMAC algorithms").into_anyhow()
            })?;
            DecodingKey::from_secret(secret.as_bytes())
        } else {
            let pem = options.public_key.as_deref().ok_or_else(|| {
                TwinError::configuration("JWT_PUBLIC_KEY is required for RSA/ECDSA algorithms")
                    .into_anyhow()
            })?;
            match options.algorithm {
                JwtAlgorithm::ES256 | JwtAlgorithm::ES384 => DecodingKey::from_ec_pem(
                    pem.as_bytes(),
                )
                .map_err(|e| {
                    TwinError::configuration(format!("invalid EC public key: {e}")).into_anyhow()
                })?,
                _ => DecodingKey::from_rsa_pem(pem.as_bytes()).map_err(|e| {
                    TwinError::configuration(format!("invalid RSA public key: {e}")).into_anyhow()
                })?,
            }
        };

        let mut validation = Validation::new(algorithm(options.algorithm));
        if let Some(issuer) = &options.issuer {
            validation.set_issuer(&[issuer]);
        }
        match &options.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }

        Ok(Self {
            options,
            decoding_key,
            validation,
            admin_role: admin_role.into(),
        })
    }

    fn verify(&self, token: &str) -> Option<Value> {
        match decode::<Value>(token, &self.decoding_key, &self.validation) {
            Ok(data) => Some(data.claims),
            Err(e) => {
                debug!(error = %e, "token verification failed");
                None
            }
        }
    }

    fn user_from_claims(&self, claims: &Value) -> Option<AuthUser> {
        let id = claim_path(claims, &self.options.user_id_claim)
            .and_then(Value::as_str)?
            .to_string();

        // The configured roles path, falling back to the Keycloak-style
        // default when it is absent from the token.
        let roles = claim_path(claims, &self.options.roles_claim)
            .or_else(|| claim_path(claims, JwtOptions::DEFAULT_ROLES_CLAIM))
            .map(roles_from_value)
            .unwrap_or_default();

        Some(AuthUser::new(id, roles))
    }
}

impl AuthProvider for JwtProvider {
    fn mode(&self) -> AuthMode {
        AuthMode::Jwt
    }

    fn admin_role(&self) -> &str {
        &self.admin_role
    }

    fn has_valid_auth(&self, headers: &RequestHeaders) -> bool {
        extract_bearer_token(headers).is_some()
    }

    fn parse_request(&self, headers: &RequestHeaders) -> Option<AuthUser> {
        let token = extract_bearer_token(headers)?;
        let claims = self.verify(&token)?;
        self.user_from_claims(&claims)
    }
}
