//! The write side of the network, as the engine sees it.

use async_trait::async_trait;
use std::sync::Arc;
use tally_core::TransportError;

use crate::engine::MutationRequest;

/// Sends a mutation to the server.
///
/// Resolves exactly once with the server's result or a typed error. Timeouts
/// belong to the implementation and surface as [`TransportError::Timeout`].
#[async_trait]
pub trait Transport<I, O>: Send + Sync
where
    I: Send + Sync,
    O: Send,
{
    async fn send(&self, request: &MutationRequest<I>) -> Result<O, TransportError>;
}

#[async_trait]
impl<I, O, T> Transport<I, O> for Arc<T>
where
    I: Send + Sync,
    O: Send,
    T: Transport<I, O> + ?Sized,
{
    async fn send(&self, request: &MutationRequest<I>) -> Result<O, TransportError> {
        (**self).send(request).await
    }
}
