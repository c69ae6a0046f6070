//! # twin-auth: authentication for TwinRS
//!
//! One [`AuthProvider`] per engine, in one of three modes: `gateway`
//! trusts upstream identity headers, `jwt` verifies bearer tokens
//! locally, `none` answers a configured anonymous sentinel. The
//! [`UserDirectory`] reconciles every authenticated identity with the
//! record store's user/role triad.

pub mod directory;
pub mod jwt;
pub mod options;
pub mod provider;
pub mod user;

pub use directory::UserDirectory;
pub use jwt::JwtProvider;
pub use options::{AuthMode, AuthOptions, JwtAlgorithm, JwtOptions};
pub use provider::{
    extract_bearer_token, make_provider, AuthProvider, GatewayProvider, NoneProvider,
    RequestHeaders, USER_ID_HEADER, USER_ROLES_HEADER,
};
pub use user::AuthUser;
