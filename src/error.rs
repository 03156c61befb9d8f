// Error handling and response types for the registry
// Domain errors map onto the HTTP surface: not-found -> 404, conflict -> 409,
// malformed input -> 400, peer transport failures -> 503.

use std::fmt::{Display, Formatter};

use actix_web::HttpResponse;

// Registry-specific error types
#[derive(thiserror::Error, Debug)]
pub enum RegistryError {
    #[error("service '{0}' not found")]
    ServiceNotFound(String),
    #[error("instance '{0}' not found")]
    InstanceNotFound(String),
    #[error("could not resolve '{0}'")]
    ResolveNotFound(String),
    #[error("service '{0}' already exists")]
    ServiceAlreadyExists(String),
    #[error("instance '{0}' already registered")]
    InstanceAlreadyRegistered(String),
    #[error("heartbeat for instance '{0}' already registered")]
    HeartbeatAlreadyRegistered(String),
    #[error("no heartbeat registration for instance '{0}'")]
    HeartbeatNotRegistered(String),
    #[error("caused: {0}")]
    IllegalArgument(String),
    #[error("network error: {0}")]
    NetworkError(String),
    #[error("internal error: {0}")]
    InternalError(String),
}

// Wrapper for application errors to implement actix-web error handling
#[derive(Debug)]
pub struct AppError {
    inner: anyhow::Error,
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        AppError { inner: value }
    }
}

impl From<RegistryError> for AppError {
    fn from(value: RegistryError) -> Self {
        AppError {
            inner: anyhow::Error::new(value),
        }
    }
}

impl actix_web::error::ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        if let Some(e) = self.inner.downcast_ref::<RegistryError>() {
            match e {
                RegistryError::ServiceNotFound(_)
                | RegistryError::InstanceNotFound(_)
                | RegistryError::ResolveNotFound(_)
                | RegistryError::HeartbeatNotRegistered(_) => {
                    HttpResponse::NotFound().body(e.to_string())
                }
                RegistryError::ServiceAlreadyExists(_)
                | RegistryError::InstanceAlreadyRegistered(_)
                | RegistryError::HeartbeatAlreadyRegistered(_) => {
                    HttpResponse::Conflict().body(e.to_string())
                }
                RegistryError::IllegalArgument(message) => {
                    HttpResponse::BadRequest().body(message.to_string())
                }
                RegistryError::NetworkError(message) => {
                    HttpResponse::ServiceUnavailable().body(message.to_string())
                }
                RegistryError::InternalError(message) => {
                    HttpResponse::InternalServerError().body(message.to_string())
                }
            }
        } else {
            HttpResponse::InternalServerError().body(self.inner.to_string())
        }
    }
}
