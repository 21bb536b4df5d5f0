use log::debug;

use super::{FacadeCollection, FacadeError};
use crate::{
    auth::{AuthResolver, Identity, IdentityPatch, IdentityProviderRef},
    registry::{self, Facades},
    repo::Repository,
    store::StoreRef,
};

/// Entry point of the data layer: one facade per registered entity, built
/// over an explicitly provided store and identity provider.
#[derive(Clone)]
pub struct FacadeRegistry {
    repo: Repository,
    facades: Facades,
}

impl FacadeRegistry {
    pub fn new(store: StoreRef, identity: IdentityProviderRef) -> Self {
        let repo = Repository::new(store, AuthResolver::new(identity));
        let facades = Facades::build(&repo);
        debug!(
            "facade registry ready ({} entities)",
            registry::descriptors().count()
        );
        Self { repo, facades }
    }

    /// Typed facades, one field per entity
    pub fn entities(&self) -> &Facades {
        &self.facades
    }

    /// Looks up a facade by logical entity name.
    pub fn by_name(&self, logical_name: &str) -> Result<FacadeCollection, FacadeError> {
        let collection = registry::physical_collection_for(logical_name)?;
        Ok(FacadeCollection::new(collection, self.repo.clone()))
    }

    pub fn auth(&self) -> &AuthResolver {
        self.repo.auth()
    }

    pub async fn me(&self) -> Result<Option<Identity>, FacadeError> {
        Ok(self.auth().current_identity().await?)
    }

    pub async fn is_authenticated(&self) -> bool {
        self.auth().is_authenticated().await
    }

    pub async fn update_me(&self, patch: IdentityPatch) -> Result<Identity, FacadeError> {
        Ok(self.auth().update_identity_attributes(patch).await?)
    }

    pub async fn sign_out(&self) -> Result<(), FacadeError> {
        Ok(self.auth().sign_out().await?)
    }
}

impl std::ops::Deref for FacadeRegistry {
    type Target = Facades;

    fn deref(&self) -> &Self::Target {
        &self.facades
    }
}
