//! Stock `Authorizer` implementations.

use async_trait::async_trait;
use url::Url;

use crate::traits::{Access, AuthError, Authorizer};

/// Authorizer that attaches no credentials and admits every request.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

#[async_trait]
impl Authorizer for AllowAll {
    async fn outbound_credentials(&self, _url: &Url) -> Result<Option<String>, AuthError> {
        Ok(None)
    }

    async fn verify_inbound(
        &self,
        _access: Access<'_>,
        _token: Option<&str>,
    ) -> Result<(), AuthError> {
        Ok(())
    }
}

/// Authorizer for a group of servers sharing one bearer token.
///
/// Outbound credentials are only attached for hosts in `trusted_hosts`, so
/// the token is never sent to arbitrary resource servers.
#[derive(Debug, Clone)]
pub struct SharedToken {
    token: String,
    trusted_hosts: Vec<String>,
}

impl SharedToken {
    #[must_use]
    pub fn new(token: impl Into<String>, trusted_hosts: Vec<String>) -> Self {
        Self {
            token: token.into(),
            trusted_hosts,
        }
    }

    fn is_trusted(&self, url: &Url) -> bool {
        url.host_str()
            .is_some_and(|host| self.trusted_hosts.iter().any(|h| h == host))
    }
}

#[async_trait]
impl Authorizer for SharedToken {
    async fn outbound_credentials(&self, url: &Url) -> Result<Option<String>, AuthError> {
        Ok(self.is_trusted(url).then(|| self.token.clone()))
    }

    async fn verify_inbound(&self, access: Access<'_>, token: Option<&str>) -> Result<(), AuthError> {
        match token {
            None => Err(AuthError::MissingCredentials),
            Some(token) if token == self.token => Ok(()),
            Some(_) => Err(AuthError::Denied(format!("{access:?}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::SessionId;

    #[tokio::test]
    async fn test_shared_token_inbound() {
        let auth = SharedToken::new("secret", vec![]);
        let id = SessionId::new("s1");

        assert_ok!(auth.verify_inbound(Access::Session(&id), Some("secret")).await);
        assert_eq!(
            auth.verify_inbound(Access::Session(&id), None).await,
            Err(AuthError::MissingCredentials)
        );
        assert_err!(auth.verify_inbound(Access::Run(None), Some("wrong")).await);
    }

    #[tokio::test]
    async fn test_shared_token_only_sent_to_trusted_hosts() {
        let auth = SharedToken::new("secret", vec!["peer.internal".into()]);
        let trusted = Url::parse("http://peer.internal/resources/1").unwrap();
        let other = Url::parse("https://bucket.example/obj").unwrap();

        assert_eq!(
            auth.outbound_credentials(&trusted).await.unwrap(),
            Some("secret".to_string())
        );
        assert_eq!(auth.outbound_credentials(&other).await.unwrap(), None);
    }
}
