//! Loader contract for the backing data source.

use std::future::Future;

use async_trait::async_trait;

use crate::error::LoaderError;

/// Reads one item from the backing data source.
///
/// `Ok(None)` means the source confirmed the identifier does not exist.
/// Implementations must be safe to call concurrently for different
/// identifiers and may be called again for an identifier whose previous
/// load failed.
#[async_trait]
pub trait Loader<Id, V>: Send + Sync
where
    Id: Send + Sync,
{
    async fn load(&self, id: &Id) -> Result<Option<V>, LoaderError>;
}

/// Adapter turning an async closure into a [`Loader`].
#[derive(Debug, Clone)]
pub struct FnLoader<F> {
    f: F,
}

/// Build a loader from `Fn(Id) -> impl Future<Output = Result<Option<V>, LoaderError>>`.
///
/// ```
/// use cacheshield_core::{loader_fn, Loader, LoaderError};
///
/// let loader = loader_fn(|id: u64| async move {
///     Ok::<_, LoaderError>((id == 42).then(|| "Cafe".to_string()))
/// });
/// # let _ = &loader;
/// ```
pub fn loader_fn<F>(f: F) -> FnLoader<F> {
    FnLoader { f }
}

#[async_trait]
impl<Id, V, F, Fut> Loader<Id, V> for FnLoader<F>
where
    Id: Clone + Send + Sync + 'static,
    V: Send + 'static,
    F: Fn(Id) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Option<V>, LoaderError>> + Send + 'static,
{
    async fn load(&self, id: &Id) -> Result<Option<V>, LoaderError> {
        (self.f)(id.clone()).await
    }
}
