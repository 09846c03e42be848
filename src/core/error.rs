use thiserror::Error;

/// Core error types for rulesweep
#[derive(Debug, Error)]
pub enum Error {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Transport-level HTTP failure (connect, timeout, TLS)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The manager answered with a non-success status
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Authentication against the manager failed or the session expired
    #[error("Authentication error: {0}")]
    Auth(String),

    /// A looked-up entity does not exist on the manager
    #[error("Not found: {0}")]
    NotFound(String),

    /// Configuration could not be loaded or is invalid
    #[error("Configuration error in {field}: {message}")]
    Config { field: String, message: String },

    /// Internal logic error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Returns `true` for failures worth retrying: connect errors, timeouts and
    /// connections dropped mid-request. Requests that could not be built are final.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Http(e) => {
                e.is_connect() || e.is_timeout() || (e.is_request() && !e.is_builder())
            }
            Error::Api { status, .. } => matches!(status, 502..=504),
            _ => false,
        }
    }
}

/// Represents a translated error with helpful context
#[derive(Debug, Clone)]
pub struct ErrorTranslation {
    pub user_message: String,
    pub suggestions: Vec<String>,
}

impl ErrorTranslation {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            user_message: message.into(),
            suggestions: Vec::new(),
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }
}

/// Database of manager API error patterns and their translations
pub struct ApiErrorPattern;

impl ApiErrorPattern {
    /// Matches an error message against known patterns and returns a user-friendly translation.
    pub fn match_error(msg: &str) -> ErrorTranslation {
        let lower = msg.to_lowercase();

        if lower.contains("authentication")
            || lower.contains("401")
            || lower.contains("unauthorized")
        {
            return ErrorTranslation::new("The manager rejected the credentials")
                .with_suggestion("Check --username and the FMC_PASSWORD environment variable")
                .with_suggestion("Verify the account has API access (System > Users)")
                .with_suggestion(
                    "A user may only hold one API session; close other scripts using it",
                );
        }

        if lower.contains("certificate") || lower.contains("tls") {
            return ErrorTranslation::new("TLS handshake with the manager failed")
                .with_suggestion("The manager usually presents a self-signed certificate")
                .with_suggestion("Pass --insecure to skip certificate verification");
        }

        if lower.contains("timed out") || lower.contains("timeout") {
            return ErrorTranslation::new("The manager did not answer in time")
                .with_suggestion("Raise --timeout for large policies")
                .with_suggestion("Check reachability of the manager host on port 443");
        }

        if lower.contains("connect") || lower.contains("dns") {
            return ErrorTranslation::new("Could not reach the manager")
                .with_suggestion("Verify --host points at the management interface")
                .with_suggestion("Check firewalls between this host and the manager");
        }

        if lower.contains("not found") || lower.contains("404") {
            return ErrorTranslation::new("The requested device or policy does not exist")
                .with_suggestion(
                    "Device names are case-sensitive; use the name shown in \
                     Devices > Device Management",
                )
                .with_suggestion("For clusters and HA pairs use the cluster or pair name");
        }

        if lower.contains("429") || lower.contains("too many requests") {
            return ErrorTranslation::new("The manager rate limit was exceeded")
                .with_suggestion("The API allows 120 requests per minute per user")
                .with_suggestion("Run again later or lower --max-disables");
        }

        // Generic fallback
        ErrorTranslation::new(format!("Manager error: {msg}"))
            .with_suggestion("Run with --debug --log-file <path> for the full request log")
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_failure_translation() {
        let translation = ApiErrorPattern::match_error("Authentication error: 401 Unauthorized");
        assert!(translation.user_message.contains("credentials"));
        assert!(
            translation
                .suggestions
                .iter()
                .any(|s| s.contains("FMC_PASSWORD"))
        );
    }

    #[test]
    fn test_tls_failure_translation() {
        let translation = ApiErrorPattern::match_error("invalid peer certificate: UnknownIssuer");
        assert!(translation.suggestions.iter().any(|s| s.contains("--insecure")));
    }

    #[test]
    fn test_device_not_found_translation() {
        let translation = ApiErrorPattern::match_error("Not found: device 'fw01'");
        assert!(translation.user_message.contains("device"));
        assert!(translation.suggestions.len() >= 2);
    }

    #[test]
    fn test_generic_fallback_keeps_message() {
        let translation = ApiErrorPattern::match_error("something odd");
        assert!(translation.user_message.contains("something odd"));
    }

    #[test]
    fn test_api_gateway_errors_are_transient() {
        let err = Error::Api {
            status: 503,
            message: "Service Unavailable".to_string(),
        };
        assert!(err.is_transient());

        let err = Error::Api {
            status: 400,
            message: "Bad Request".to_string(),
        };
        assert!(!err.is_transient());
        assert!(!Error::Auth("expired".to_string()).is_transient());
    }

    #[tokio::test]
    async fn test_dropped_connection_is_transient() {
        // Accepts one connection and closes it without answering
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            drop(stream);
        });

        let err = reqwest::Client::new()
            .get(format!("http://{addr}/api/fmc_config/v1/domain"))
            .send()
            .await
            .unwrap_err();
        server.join().unwrap();

        assert!(!err.is_builder());
        assert!(Error::Http(err).is_transient());
    }

    #[tokio::test]
    async fn test_unbuildable_request_is_not_transient() {
        let err = reqwest::Client::new()
            .get("not a url")
            .send()
            .await
            .unwrap_err();
        assert!(err.is_builder());
        assert!(!Error::Http(err).is_transient());
    }
}
