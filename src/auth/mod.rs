//! # Authentication Resolver
//!
//! Resolves the identity on whose behalf the layer is operating. Identities
//! come from an [`IdentityProvider`] injected at construction time.
//!
//! Having no session is a regular state, modelled as `Ok(None)`. Errors are
//! reserved for failures of the provider itself (e.g. the identity service
//! being unreachable).

mod session;
pub use session::*;

use std::sync::Arc;

use async_trait::async_trait;
use log::{trace, warn};
use serde::{Deserialize, Serialize};

/// Role assigned when the identity provider does not supply one
pub const DEFAULT_ROLE: &str = "user";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no authenticated identity")]
    Unauthenticated,
    #[error("identity provider unavailable :: {0}")]
    Unavailable(String),
    #[error("identity provider rejected the request :: {0}")]
    Rejected(String),
}

fn default_role() -> String {
    DEFAULT_ROLE.to_owned()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: String,
    pub email: String,
    pub display_name: String,
    #[serde(default = "default_role")]
    pub role: String,
}

impl Identity {
    pub fn new(id: impl Into<String>, email: impl Into<String>) -> Self {
        let email = email.into();
        Self {
            id: id.into(),
            display_name: email.clone(),
            email,
            role: default_role(),
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }
}

/// Partial update of the current identity attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityPatch {
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub role: Option<String>,
}

impl IdentityPatch {
    pub fn apply(self, identity: &mut Identity) {
        if let Some(email) = self.email {
            identity.email = email;
        }
        if let Some(display_name) = self.display_name {
            identity.display_name = display_name;
        }
        if let Some(role) = self.role {
            identity.role = role;
        }
    }
}

/// Backing identity service.
#[async_trait]
pub trait IdentityProvider: Send + Sync + 'static {
    /// Returns the identity of the active session, if any.
    async fn session(&self) -> Result<Option<Identity>, Error>;

    /// Persists new attributes for `identity` and returns the updated identity.
    async fn update_attributes(
        &self,
        identity: Identity,
        patch: IdentityPatch,
    ) -> Result<Identity, Error>;

    /// Terminates the active session, a no-op when there is none.
    async fn sign_out(&self) -> Result<(), Error>;
}

pub type IdentityProviderRef = Arc<dyn IdentityProvider>;

#[derive(Clone)]
pub struct AuthResolver {
    provider: IdentityProviderRef,
}

impl AuthResolver {
    pub fn new(provider: IdentityProviderRef) -> Self {
        Self { provider }
    }

    pub async fn current_identity(&self) -> Result<Option<Identity>, Error> {
        self.provider.session().await
    }

    /// Provider failures count as not authenticated.
    pub async fn is_authenticated(&self) -> bool {
        matches!(self.current_identity().await, Ok(Some(_)))
    }

    /// Email to stamp as record owner.
    ///
    /// Ownership stamping is best-effort: a failing provider is logged and
    /// treated as an anonymous write.
    pub async fn owner_stamp(&self) -> Option<String> {
        match self.current_identity().await {
            Ok(identity) => identity.map(|i| i.email),
            Err(e) => {
                warn!("identity lookup failed, writing without owner :: {e}");
                None
            }
        }
    }

    pub async fn update_identity_attributes(&self, patch: IdentityPatch) -> Result<Identity, Error> {
        let identity = self
            .current_identity()
            .await?
            .ok_or(Error::Unauthenticated)?;

        trace!("updating attributes of identity `{}`", identity.id);
        self.provider.update_attributes(identity, patch).await
    }

    pub async fn sign_out(&self) -> Result<(), Error> {
        self.provider.sign_out().await
    }
}
