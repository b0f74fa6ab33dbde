//! Credentials for the user data feed
//!
//! User-feed subscriptions carry a short-lived signed token. Issuing it is
//! the host application's business; the client only asks for one per
//! request through `CredentialProvider`.

use std::fmt;

use crate::error::FeedError;

pub trait CredentialProvider: Send + Sync {
    /// Token to attach to a request sent to `uri`.
    fn credential(&self, uri: &str) -> Result<String, FeedError>;
}

/// A pre-issued token returned for every request.
#[derive(Clone)]
pub struct StaticCredential {
    token: String,
}

impl StaticCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }
}

impl CredentialProvider for StaticCredential {
    fn credential(&self, _uri: &str) -> Result<String, FeedError> {
        if self.token.is_empty() {
            return Err(FeedError::Credential("no token configured".to_string()));
        }
        Ok(self.token.clone())
    }
}

// Tokens stay out of logs
impl fmt::Debug for StaticCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticCredential").field("token", &"<redacted>").finish()
    }
}

impl<F> CredentialProvider for F
where
    F: Fn(&str) -> Result<String, FeedError> + Send + Sync,
{
    fn credential(&self, uri: &str) -> Result<String, FeedError> {
        self(uri)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_credential() {
        let provider = StaticCredential::new("abc");
        assert_eq!(provider.credential("wss://example").unwrap(), "abc");
        assert!(!format!("{provider:?}").contains("abc"));

        let empty = StaticCredential::new("");
        assert!(matches!(empty.credential("wss://example"), Err(FeedError::Credential(_))));
    }

    #[test]
    fn test_closure_provider() {
        let provider = |uri: &str| -> Result<String, FeedError> { Ok(format!("token-for-{uri}")) };
        assert_eq!(provider.credential("u").unwrap(), "token-for-u");
    }
}
