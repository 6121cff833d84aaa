use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy for the broker.
///
/// `AuthenticationRequired`, `FlowExpired`, and `ExchangeFailed` are
/// actionable and surfaced through the chat layer; `FlowUnknown` is logged
/// and dropped, since an unrecognized state may be a replay or a forged
/// callback and must not produce user-visible output.
#[derive(Debug, Error)]
pub enum Error {
    #[error("authentication required for '{service}'")]
    AuthenticationRequired { service: String },

    #[error("login flow expired")]
    FlowExpired,

    #[error("no pending login flow for state '{state}'")]
    FlowUnknown { state: String },

    #[error("token exchange failed: {reason}")]
    ExchangeFailed { reason: String },

    #[error("client registration failed: {reason}")]
    RegistrationFailed { reason: String },

    #[error("connection to '{service}' failed: {reason}")]
    ConnectionFailed { service: String, reason: String },

    #[error("remote tool error: {0}")]
    Tool(String),

    #[error("unknown service '{0}'")]
    UnknownService(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Failures worth one automatic retry: timeout, connection reset, or the
    /// upstream briefly unavailable.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Http(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || matches!(e.status().map(|s| s.as_u16()), Some(502..=504))
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_http_errors_are_not_transient() {
        assert!(!Error::FlowExpired.is_transient());
        assert!(
            !Error::AuthenticationRequired {
                service: "calendar".to_string()
            }
            .is_transient()
        );
        assert!(
            !Error::ExchangeFailed {
                reason: "denied".to_string()
            }
            .is_transient()
        );
    }

    #[test]
    fn test_display_messages() {
        let err = Error::AuthenticationRequired {
            service: "calendar".to_string(),
        };
        assert_eq!(err.to_string(), "authentication required for 'calendar'");

        let err = Error::FlowUnknown {
            state: "abc".to_string(),
        };
        assert!(err.to_string().contains("abc"));
    }
}
