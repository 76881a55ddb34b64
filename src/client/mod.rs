//! Resource client abstraction: the opaque remote side of a step.
//!
//! The engine only sequences calls; what a deploy or invoke means on chain is
//! entirely the client's business. One handle is never called concurrently.

pub mod command;
pub mod simulated;

use crate::core::types::{BoundCall, Identity};
use async_trait::async_trait;
use thiserror::Error;

pub use command::CommandClient;
pub use simulated::SimulatedClient;

/// Errors surfaced by a resource client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The remote operation ran and reported failure.
    #[error("{0}")]
    Rejected(String),

    /// The client answered with something other than the expected reply.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The client could not be started or talked to.
    #[error("client I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No usable client configuration.
    #[error("client not configured: {0}")]
    NotConfigured(String),
}

/// Deploys resources and invokes methods on them.
#[async_trait]
pub trait ResourceClient: Send {
    /// Create a resource of `contract` kind and return its identity.
    async fn deploy(
        &mut self,
        contract: &str,
        args: &[serde_json::Value],
    ) -> Result<Identity, ClientError>;

    /// Call `method` on an existing resource.
    async fn invoke(
        &mut self,
        target: &Identity,
        method: &str,
        args: &[serde_json::Value],
    ) -> Result<(), ClientError>;
}

/// Route a bound call to the client. Deploys yield an identity, invokes don't.
pub async fn dispatch<C: ResourceClient + ?Sized>(
    client: &mut C,
    call: &BoundCall,
) -> Result<Option<Identity>, ClientError> {
    match call {
        BoundCall::Deploy { contract, args } => client.deploy(contract, args).await.map(Some),
        BoundCall::Invoke {
            target,
            method,
            args,
        } => client.invoke(target, method, args).await.map(|_| None),
    }
}
