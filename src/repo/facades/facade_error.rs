use crate::{auth, query, registry, store};

#[derive(thiserror::Error, Debug)]
pub enum FacadeError {
    #[error("configuration error :: {0}")]
    ConfigError(#[from] registry::Error),
    #[error("store error :: {0}")]
    StoreError(#[from] store::Error),
    #[error("query error :: {0}")]
    QueryError(#[from] query::Error),
    #[error("identity error :: {0}")]
    AuthError(#[from] auth::Error),
}

impl FacadeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::StoreError(e) if e.is_not_found())
    }
}
