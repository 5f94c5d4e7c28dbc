use thiserror::Error;

/// Sign-in, sign-out and token acquisition failures.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("sign-in was cancelled")]
    Cancelled,

    #[error("no user is signed in")]
    NotSignedIn,

    #[error("session is no longer valid; sign in again")]
    SessionExpired,

    #[error("identity provider error: {0}")]
    Provider(String),

    #[error("session storage error: {0}")]
    Io(#[from] std::io::Error),
}

/// Input refused before any request is issued.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("title must not be empty")]
    EmptyTitle,

    #[error("text must not be empty")]
    EmptyText,
}

/// Any network failure or non-2xx response from the remote API.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {route} failed: {source}")]
    Network {
        route: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{route} returned HTTP {status}: {body}")]
    Status {
        route: String,
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("failed to decode response from {route}: {source}")]
    Decode {
        route: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid request url {0}")]
    InvalidUrl(String),
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Fetch(#[from] FetchError),
}

pub(crate) fn require_text(value: &str, err: ValidationError) -> Result<&str, ValidationError> {
    if value.trim().is_empty() {
        Err(err)
    } else {
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_input_is_rejected() {
        assert_eq!(
            require_text("   \t", ValidationError::EmptyTitle),
            Err(ValidationError::EmptyTitle)
        );
        assert_eq!(require_text("", ValidationError::EmptyText), Err(ValidationError::EmptyText));
        assert_eq!(require_text(" milk ", ValidationError::EmptyText), Ok(" milk "));
    }
}
