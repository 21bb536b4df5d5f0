use async_trait::async_trait;
use log::info;
use tokio::sync::RwLock;

use super::{Error, Identity, IdentityPatch, IdentityProvider};

/// In-process identity provider holding at most one session.
///
/// Used by embedders that authenticate elsewhere and hand the resulting
/// identity over with [`SessionProvider::sign_in`].
#[derive(Debug, Default)]
pub struct SessionProvider {
    session: RwLock<Option<Identity>>,
}

impl SessionProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signed_in(identity: Identity) -> Self {
        Self {
            session: RwLock::new(Some(identity)),
        }
    }

    pub async fn sign_in(&self, identity: Identity) {
        info!("session opened for `{}`", identity.email);
        *self.session.write().await = Some(identity);
    }
}

#[async_trait]
impl IdentityProvider for SessionProvider {
    async fn session(&self) -> Result<Option<Identity>, Error> {
        Ok(self.session.read().await.clone())
    }

    async fn update_attributes(
        &self,
        identity: Identity,
        patch: IdentityPatch,
    ) -> Result<Identity, Error> {
        let mut session = self.session.write().await;
        match session.as_mut() {
            // the session may have changed since `identity` was resolved
            Some(current) if current.id == identity.id => {
                patch.apply(current);
                Ok(current.clone())
            }
            Some(_) => Err(Error::Rejected(format!(
                "identity `{}` no longer owns the session",
                identity.id
            ))),
            None => Err(Error::Unauthenticated),
        }
    }

    async fn sign_out(&self) -> Result<(), Error> {
        if let Some(identity) = self.session.write().await.take() {
            info!("session closed for `{}`", identity.email);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthResolver;
    use std::sync::Arc;

    #[tokio::test]
    async fn no_session_is_not_an_error() {
        let auth = AuthResolver::new(Arc::new(SessionProvider::new()));

        assert_eq!(auth.current_identity().await.unwrap(), None);
        assert!(!auth.is_authenticated().await);
        assert_eq!(auth.owner_stamp().await, None);
        assert!(matches!(
            auth.update_identity_attributes(IdentityPatch::default()).await,
            Err(Error::Unauthenticated)
        ));
        // signing out twice is harmless
        auth.sign_out().await.unwrap();
        auth.sign_out().await.unwrap();
    }

    #[tokio::test]
    async fn session_lifecycle() {
        let provider = Arc::new(SessionProvider::new());
        let auth = AuthResolver::new(provider.clone());

        provider
            .sign_in(Identity::new("u1", "kid@home.test"))
            .await;
        assert!(auth.is_authenticated().await);
        assert_eq!(auth.owner_stamp().await.as_deref(), Some("kid@home.test"));

        let updated = auth
            .update_identity_attributes(IdentityPatch {
                display_name: Some("Kiddo".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(updated.display_name, "Kiddo");
        assert_eq!(
            auth.current_identity().await.unwrap().unwrap().display_name,
            "Kiddo"
        );

        auth.sign_out().await.unwrap();
        assert!(!auth.is_authenticated().await);
    }
}
