use thiserror::Error;

/// Failure classes the orchestrator must distinguish.  `PayloadTooLarge` is
/// the one retried with a trimmed conversation; everything else propagates
/// to the caller of `chat`.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider rejected the request as exceeding its context window
    /// (HTTP 400/413 on the chat endpoint).
    #[error("request payload too large for the model context window")]
    PayloadTooLarge,

    #[error("provider authentication failed: {0}")]
    Auth(String),

    #[error("provider returned HTTP {status}: {message}")]
    Api { status: u16, message: String },

    #[error("network error talking to provider: {0}")]
    Network(#[from] reqwest::Error),

    #[error("{0}")]
    NotConfigured(String),
}

impl ProviderError {
    /// Classify a non-success chat response by status code.
    pub(crate) fn from_status(status: u16, message: String) -> Self {
        match status {
            400 | 413 => ProviderError::PayloadTooLarge,
            401 | 403 => ProviderError::Auth(message),
            _ => ProviderError::Api { status, message },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_400_maps_to_payload_too_large() {
        assert!(matches!(
            ProviderError::from_status(400, "too big".into()),
            ProviderError::PayloadTooLarge
        ));
        assert!(matches!(
            ProviderError::from_status(413, "too big".into()),
            ProviderError::PayloadTooLarge
        ));
    }

    #[test]
    fn status_401_maps_to_auth() {
        assert!(matches!(
            ProviderError::from_status(401, "bad key".into()),
            ProviderError::Auth(_)
        ));
    }

    #[test]
    fn other_statuses_map_to_api() {
        match ProviderError::from_status(500, "boom".into()) {
            ProviderError::Api { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "boom");
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
