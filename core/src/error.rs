use std::fmt;

use serde::Serialize;

/// The kind of external resource a provisioning step failed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProvisioningStage {
    Cluster,
    Sandbox,
    Readiness,
}

impl fmt::Display for ProvisioningStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cluster => write!(f, "cluster"),
            Self::Sandbox => write!(f, "sandbox"),
            Self::Readiness => write!(f, "readiness"),
        }
    }
}

/// The port range a lease was requested from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PortKind {
    Api,
    IngressHttp,
    IngressHttps,
}

impl fmt::Display for PortKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Api => write!(f, "api"),
            Self::IngressHttp => write!(f, "ingressHTTP"),
            Self::IngressHttps => write!(f, "ingressHTTPS"),
        }
    }
}

/// Stable, source-independent error identifier. Never leak stack traces or
/// filesystem paths alongside these — `message` is the only free-text field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ErrorKind {
    Validation,
    Unauthenticated,
    CredentialExpired,
    CredentialInvalid,
    Forbidden,
    NotFound,
    ConflictActive,
    AlreadyExtended,
    AtCapacity,
    Exhausted { port_kind: PortKind },
    RateLimited,
    Provisioning { stage: ProvisioningStage },
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation => write!(f, "Validation"),
            Self::Unauthenticated => write!(f, "Unauthenticated"),
            Self::CredentialExpired => write!(f, "CredentialExpired"),
            Self::CredentialInvalid => write!(f, "CredentialInvalid"),
            Self::Forbidden => write!(f, "Forbidden"),
            Self::NotFound => write!(f, "NotFound"),
            Self::ConflictActive => write!(f, "Conflict(active)"),
            Self::AlreadyExtended => write!(f, "AlreadyExtended"),
            Self::AtCapacity => write!(f, "AtCapacity"),
            Self::Exhausted { port_kind } => write!(f, "Exhausted({port_kind})"),
            Self::RateLimited => write!(f, "RateLimited"),
            Self::Provisioning { stage } => write!(f, "Provisioning({stage})"),
            Self::Internal => write!(f, "Internal"),
        }
    }
}

/// The orchestrator's one error type. Carries a stable `(kind, message)` pair;
/// the HTTP layer maps `kind` to a status code, the Gateway maps it to a close
/// code. Construct via `OrchestratorError::new` or one of the `From` impls;
/// wrap driver/store failures with `.map_err(OrchestratorError::internal)`.
#[derive(Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct OrchestratorError {
    pub kind: ErrorKind,
    pub message: String,
}

impl OrchestratorError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn internal(e: impl fmt::Display) -> Self {
        Self::new(ErrorKind::Internal, e.to_string())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn conflict_active() -> Self {
        Self::new(ErrorKind::ConflictActive, "owner has an active session")
    }

    pub fn at_capacity() -> Self {
        Self::new(ErrorKind::AtCapacity, "platform is at capacity")
    }

    pub fn rate_limited() -> Self {
        Self::new(ErrorKind::RateLimited, "rate limit exceeded")
    }

    pub fn exhausted(port_kind: PortKind) -> Self {
        Self::new(
            ErrorKind::Exhausted { port_kind },
            format!("no free ports left in the {port_kind} range"),
        )
    }

    pub fn provisioning(stage: ProvisioningStage, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Provisioning { stage }, message)
    }

    /// HTTP status class for this error kind, per the error-handling table.
    pub fn status_class(&self) -> u16 {
        match &self.kind {
            ErrorKind::Validation => 400,
            ErrorKind::Unauthenticated | ErrorKind::CredentialExpired | ErrorKind::CredentialInvalid => 401,
            ErrorKind::Forbidden => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::ConflictActive | ErrorKind::AlreadyExtended => 409,
            ErrorKind::AtCapacity => 409,
            ErrorKind::Exhausted { .. } => 503,
            ErrorKind::RateLimited => 429,
            ErrorKind::Provisioning { .. } | ErrorKind::Internal => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_class_matches_table() {
        assert_eq!(OrchestratorError::conflict_active().status_class(), 409);
        assert_eq!(OrchestratorError::at_capacity().status_class(), 409);
        assert_eq!(
            OrchestratorError::exhausted(PortKind::Api).status_class(),
            503
        );
        assert_eq!(OrchestratorError::rate_limited().status_class(), 429);
        assert_eq!(
            OrchestratorError::provisioning(ProvisioningStage::Sandbox, "boom").status_class(),
            500
        );
    }

    #[test]
    fn display_matches_stable_names() {
        assert_eq!(ErrorKind::ConflictActive.to_string(), "Conflict(active)");
        assert_eq!(
            ErrorKind::Exhausted {
                port_kind: PortKind::IngressHttp
            }
            .to_string(),
            "Exhausted(ingressHTTP)"
        );
    }
}
