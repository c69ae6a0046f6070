//! # Errors
//!
//! TwinRS uses a structured error type that can travel through
//! `anyhow::Error` across component, scheduler, and HTTP boundaries.
//! Core goals:
//! - consistent status codes + kind names
//! - transport-agnostic (the engine decides how to serialize)
//! - lossless downcast back to the structured form at the HTTP edge

use std::fmt;

use anyhow::Error as AnyError;

/// A convenience result type for TwinRS core APIs.
pub type TwinResult<T> = std::result::Result<T, AnyError>;

/// Error kinds with fixed HTTP status mappings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,      // 400
    Authentication,  // 401
    Authorization,   // 403
    NotFound,        // 404
    Unprocessable,   // 422
    Storage,         // 500
    Database,        // 500
    Configuration,   // 500
    Queue,           // 500
    FileOperation,   // 500
    ExternalService, // 502
}

impl ErrorKind {
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorKind::Validation => 400,
            ErrorKind::Authentication => 401,
            ErrorKind::Authorization => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::Unprocessable => 422,
            ErrorKind::Storage => 500,
            ErrorKind::Database => 500,
            ErrorKind::Configuration => 500,
            ErrorKind::Queue => 500,
            ErrorKind::FileOperation => 500,
            ErrorKind::ExternalService => 502,
        }
    }

    /// Stable machine-readable code (e.g. "NOT_FOUND").
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "VALIDATION_ERROR",
            ErrorKind::Authentication => "AUTHENTICATION_ERROR",
            ErrorKind::Authorization => "AUTHORIZATION_ERROR",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Unprocessable => "UNPROCESSABLE_ENTITY",
            ErrorKind::Storage => "STORAGE_ERROR",
            ErrorKind::Database => "DATABASE_ERROR",
            ErrorKind::Configuration => "CONFIGURATION_ERROR",
            ErrorKind::Queue => "QUEUE_ERROR",
            ErrorKind::FileOperation => "FILE_OPERATION_ERROR",
            ErrorKind::ExternalService => "EXTERNAL_SERVICE_ERROR",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "Validation",
            ErrorKind::Authentication => "Authentication",
            ErrorKind::Authorization => "Authorization",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::Unprocessable => "Unprocessable",
            ErrorKind::Storage => "Storage",
            ErrorKind::Database => "Database",
            ErrorKind::Configuration => "Configuration",
            ErrorKind::Queue => "Queue",
            ErrorKind::FileOperation => "FileOperation",
            ErrorKind::ExternalService => "ExternalService",
        }
    }
}

/// A structured TwinRS error that can live inside `anyhow::Error`.
///
/// - kind (drives the HTTP status)
/// - message
/// - context (optional structured payload for the envelope)
/// - source (kept server-side, never serialized to clients)
#[derive(Debug)]
pub struct TwinError {
    pub kind: ErrorKind,
    pub message: String,
    pub context: Option<serde_json::Value>,
    pub source: Option<AnyError>,
}

impl TwinError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: None,
            source: None,
        }
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_source(mut self, source: AnyError) -> Self {
        self.source = Some(source);
        self
    }

    pub fn status_code(&self) -> u16 {
        self.kind.status_code()
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    /// Convert into `anyhow::Error` so it flows through async pipelines.
    pub fn into_anyhow(self) -> AnyError {
        AnyError::new(self)
    }

    /// Downcast an `anyhow::Error` to a `TwinError` if possible.
    pub fn from_anyhow(err: &AnyError) -> Option<&TwinError> {
        err.chain().find_map(|e| e.downcast_ref::<TwinError>())
    }

    /// Turn any error into a TwinError:
    /// - if it is already a TwinError, keep it (lossless)
    /// - otherwise wrap as Storage (the generic 500)
    pub fn normalize(err: AnyError) -> TwinError {
        match err.downcast::<TwinError>() {
            Ok(twin) => twin,
            Err(other) => {
                TwinError::new(ErrorKind::Storage, other.to_string()).with_source(other)
            }
        }
    }

    /// Client-safe copy: keeps kind/message/context, drops the source chain.
    pub fn sanitize_for_client(&self) -> TwinError {
        TwinError {
            kind: self.kind,
            message: self.message.clone(),
            context: self.context.clone(),
            source: None,
        }
    }

    // ---- Constructors, one per kind ----

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, msg)
    }
    pub fn authentication(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authentication, msg)
    }
    pub fn authorization(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authorization, msg)
    }
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, msg)
    }
    pub fn unprocessable(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unprocessable, msg)
    }
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Storage, msg)
    }
    pub fn database(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Database, msg)
    }
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, msg)
    }
    pub fn queue(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Queue, msg)
    }
    pub fn file_operation(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::FileOperation, msg)
    }
    pub fn external_service(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::ExternalService, msg)
    }
}

impl fmt::Display for TwinError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}): {}",
            self.kind.name(),
            self.status_code(),
            self.message
        )
    }
}

impl std::error::Error for TwinError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Convenience helper for "bail with TwinError".
#[macro_export]
macro_rules! bail_twin {
    ($ctor:ident, $msg:expr) => {
        return Err($crate::errors::TwinError::$ctor($msg).into_anyhow());
    };
    ($ctor:ident, $fmt:expr, $($arg:tt)*) => {
        return Err($crate::errors::TwinError::$ctor(format!($fmt, $($arg)*)).into_anyhow());
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_the_table() {
        assert_eq!(ErrorKind::Validation.status_code(), 400);
        assert_eq!(ErrorKind::Authentication.status_code(), 401);
        assert_eq!(ErrorKind::Authorization.status_code(), 403);
        assert_eq!(ErrorKind::NotFound.status_code(), 404);
        assert_eq!(ErrorKind::Unprocessable.status_code(), 422);
        assert_eq!(ErrorKind::Database.status_code(), 500);
        assert_eq!(ErrorKind::ExternalService.status_code(), 502);
    }

    #[test]
    fn round_trips_through_anyhow() {
        let err = TwinError::not_found("record 42").into_anyhow();
        let back = TwinError::from_anyhow(&err).expect("downcast");
        assert_eq!(back.kind, ErrorKind::NotFound);
        assert_eq!(back.message, "record 42");
    }

    #[test]
    fn round_trips_through_anyhow_context() {
        let err = TwinError::queue("enqueue failed")
            .into_anyhow()
            .context("while scheduling");
        let back = TwinError::from_anyhow(&err).expect("downcast through context");
        assert_eq!(back.kind, ErrorKind::Queue);
    }

    #[test]
    fn normalize_wraps_foreign_errors_as_storage() {
        let err = anyhow::anyhow!("disk on fire");
        let twin = TwinError::normalize(err);
        assert_eq!(twin.kind, ErrorKind::Storage);
        assert!(twin.source.is_some());
    }

    #[test]
    fn sanitize_drops_the_source() {
        let inner = anyhow::anyhow!("secret connection string");
        let twin = TwinError::database("query failed").with_source(inner);
        let safe = twin.sanitize_for_client();
        assert!(safe.source.is_none());
        assert_eq!(safe.message, "query failed");
    }
}
