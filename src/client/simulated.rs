//! In-process client with deterministic identities.
//!
//! Backs `start --simulate` and the engine tests. Identities are the first
//! 20 bytes of a BLAKE3 digest over the call and a call counter, rendered as
//! `0x`-prefixed hex like an EVM address.

use super::{ClientError, ResourceClient};
use crate::core::types::{BoundCall, Identity};
use crate::ledger::hasher;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Default)]
pub struct SimulatedClient {
    calls: Vec<BoundCall>,
    /// contract or method name → rejection message
    failures: HashMap<String, String>,
    /// contract or method name → artificial latency
    delays: HashMap<String, Duration>,
    counter: u64,
}

impl SimulatedClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every call to this contract (deploy) or method (invoke).
    pub fn fail_on(&mut self, key: &str, message: &str) -> &mut Self {
        self.failures.insert(key.to_string(), message.to_string());
        self
    }

    pub fn clear_failures(&mut self) -> &mut Self {
        self.failures.clear();
        self
    }

    /// Sleep before answering calls to this contract or method.
    pub fn delay_on(&mut self, key: &str, delay: Duration) -> &mut Self {
        self.delays.insert(key.to_string(), delay);
        self
    }

    /// Every call received, in order, including rejected ones.
    pub fn calls(&self) -> &[BoundCall] {
        &self.calls
    }

    /// Number of deploy calls made for a contract.
    pub fn deploys_of(&self, contract: &str) -> usize {
        self.calls
            .iter()
            .filter(|c| matches!(c, BoundCall::Deploy { contract: name, .. } if name == contract))
            .count()
    }

    async fn answer(&mut self, key: &str) -> Result<(), ClientError> {
        if let Some(delay) = self.delays.get(key).copied() {
            tokio::time::sleep(delay).await;
        }
        match self.failures.get(key) {
            Some(message) => Err(ClientError::Rejected(message.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ResourceClient for SimulatedClient {
    async fn deploy(
        &mut self,
        contract: &str,
        args: &[serde_json::Value],
    ) -> Result<Identity, ClientError> {
        self.calls.push(BoundCall::Deploy {
            contract: contract.to_string(),
            args: args.to_vec(),
        });
        self.answer(contract).await?;

        self.counter += 1;
        let encoded_args = serde_json::Value::Array(args.to_vec()).to_string();
        let counter = self.counter.to_string();
        let digest = hasher::composite_hash(&[contract, &encoded_args, &counter]);
        let hex = digest.trim_start_matches("blake3:");
        Ok(Identity::new(format!("0x{}", &hex[..40])))
    }

    async fn invoke(
        &mut self,
        target: &Identity,
        method: &str,
        args: &[serde_json::Value],
    ) -> Result<(), ClientError> {
        self.calls.push(BoundCall::Invoke {
            target: target.clone(),
            method: method.to_string(),
            args: args.to_vec(),
        });
        self.answer(method).await
    }
}
