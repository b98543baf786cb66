use bytes::Bytes;
use http::StatusCode;

#[derive(Debug)]
pub struct ProxyError {
    pub status: StatusCode,
    pub body: Bytes,
}

impl ProxyError {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn bad_request(message: impl Into<Bytes>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<Bytes>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn method_not_allowed(message: impl Into<Bytes>) -> Self {
        Self::new(StatusCode::METHOD_NOT_ALLOWED, message)
    }

    pub fn rotating_accounts() -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "rotating accounts")
    }

    pub fn system_busy() -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "system busy")
    }

    pub fn link_unavailable() -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "agent link unavailable")
    }
}
