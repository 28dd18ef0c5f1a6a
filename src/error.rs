//! Error classification
//!
//! Provider errors are classified once, from their error code, into a typed
//! [`ApiError`]. The collector only ever asks "is this a permission problem?"
//! through [`is_permission_denied`], never by comparing strings.

use crate::graph::NodeKey;
use std::any::Any;
use thiserror::Error;

/// Category of a provider API error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ApiErrorKind {
    /// Caller lacks the permission for this call (resource kind is skipped)
    PermissionDenied,
    /// Entity does not exist
    NotFound,
    /// Rate limit exceeded
    Throttled,
    /// Anything else
    Other,
}

/// Error returned by an API call
#[derive(Debug, Clone, Error)]
#[error("{}: {message}", code.as_deref().unwrap_or("UnknownError"))]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub code: Option<String>,
    pub message: String,
}

impl ApiError {
    pub fn is_permission_denied(&self) -> bool {
        self.kind == ApiErrorKind::PermissionDenied
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ApiErrorKind::NotFound
    }

    /// Whether `code` is one of the given expected error codes
    pub fn has_code(&self, codes: &[&str]) -> bool {
        self.code
            .as_deref()
            .map(|c| codes.contains(&c))
            .unwrap_or(false)
    }
}

/// Error codes providers use for authorization failures
pub const PERMISSION_DENIED_CODES: &[&str] = &[
    "AccessDenied",
    "AccessDeniedException",
    "UnauthorizedOperation",
    "UnauthorizedAccess",
    "AuthorizationError",
    "AuthFailure",
    "Forbidden",
];

const NOT_FOUND_CODES: &[&str] = &["NoSuchEntity", "NotFound", "ResourceNotFoundException"];

const THROTTLING_CODES: &[&str] = &["Throttling", "ThrottlingException", "RequestLimitExceeded"];

/// Classify a provider error from its code
pub fn classify_api_error(code: Option<&str>, message: Option<&str>) -> ApiError {
    let kind = match code {
        Some(c) if PERMISSION_DENIED_CODES.contains(&c) => ApiErrorKind::PermissionDenied,
        Some(c) if NOT_FOUND_CODES.contains(&c) => ApiErrorKind::NotFound,
        Some(c) if THROTTLING_CODES.contains(&c) => ApiErrorKind::Throttled,
        _ => ApiErrorKind::Other,
    };

    ApiError {
        kind,
        code: code.map(str::to_string),
        message: message.unwrap_or("Unknown error").to_string(),
    }
}

/// Find the first [`ApiError`] in an error chain
pub fn find_api_error(error: &anyhow::Error) -> Option<&ApiError> {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<ApiError>())
}

/// Check whether an error was caused by a permission-denied API error
pub fn is_permission_denied(error: &anyhow::Error) -> bool {
    find_api_error(error)
        .map(ApiError::is_permission_denied)
        .unwrap_or(false)
}

/// Message of a caught panic payload
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Graph mutation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// An edge endpoint was not inserted before the edge
    #[error("cannot add edge {from} -> {to}: node {missing} is not in the graph")]
    MissingNode {
        from: NodeKey,
        to: NodeKey,
        missing: NodeKey,
    },
}
