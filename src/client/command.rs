//! Bridge-program client.
//!
//! Runs the operator's bridge (a hardhat/foundry script, for instance) once
//! per call. The request goes to stdin as one JSON object, never as argv, so
//! argument length and quoting never matter. A deploy must print
//! `{"identity": "..."}` as its last non-empty stdout line; a non-zero exit is
//! a rejection carrying stderr. The child is killed if the call is dropped,
//! which is how the engine's timeout stops it. On unix it runs in its own
//! process group so an operator's Ctrl-C lets the current call finish.

use super::{ClientError, ResourceClient};
use crate::core::types::{CampaignConfig, Identity, NetworkConfig};
use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Request written to the bridge's stdin.
#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum BridgeRequest<'a> {
    Deploy {
        contract: &'a str,
        args: &'a [serde_json::Value],
    },
    Invoke {
        target: &'a str,
        method: &'a str,
        args: &'a [serde_json::Value],
    },
}

#[derive(Debug, Deserialize)]
struct DeployReply {
    identity: String,
}

#[derive(Debug, Clone)]
pub struct CommandClient {
    program: String,
    args: Vec<String>,
    env: IndexMap<String, String>,
}

impl CommandClient {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            env: IndexMap::new(),
        }
    }

    /// Build from the campaign's client and network sections.
    pub fn from_config(config: &CampaignConfig) -> Result<Self, ClientError> {
        let program = config
            .client
            .command
            .clone()
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| {
                ClientError::NotConfigured("campaign has no client.command".to_string())
            })?;
        let mut client = Self::new(program, config.client.args.clone());
        client.env = config.client.env.clone();
        if let Some(ref network) = config.network {
            client.env.extend(network_env(network));
        }
        Ok(client)
    }

    async fn run(&self, request: &BridgeRequest<'_>) -> Result<String, ClientError> {
        let payload = serde_json::to_vec(request)
            .map_err(|e| ClientError::Protocol(format!("cannot encode request: {}", e)))?;

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group: a terminal Ctrl-C reaches the engine, not the step in flight
        #[cfg(unix)]
        command.process_group(0);
        let mut child = command.spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            match stdin.write_all(&payload).await {
                Ok(()) => {}
                // Bridge exited without reading; its exit status tells the story
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                Err(e) => return Err(e.into()),
            }
        }

        let output = child.wait_with_output().await?;
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        debug!(program = %self.program, status = ?output.status, "bridge returned");

        if !output.status.success() {
            let code = output
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            let detail = stderr.trim();
            return Err(ClientError::Rejected(if detail.is_empty() {
                format!("bridge exited with {}", code)
            } else {
                format!("bridge exited with {}: {}", code, detail)
            }));
        }
        Ok(stdout)
    }
}

/// Environment describing the target network. Only names, never secrets.
fn network_env(network: &NetworkConfig) -> Vec<(String, String)> {
    let mut env = vec![("CHAINPLAN_NETWORK".to_string(), network.name.clone())];
    if let Some(ref var) = network.rpc_url_env {
        env.push(("CHAINPLAN_RPC_URL_ENV".to_string(), var.clone()));
    }
    if let Some(chain_id) = network.chain_id {
        env.push(("CHAINPLAN_CHAIN_ID".to_string(), chain_id.to_string()));
    }
    env
}

/// Parse the identity from the last non-empty stdout line.
fn parse_deploy_reply(stdout: &str) -> Result<Identity, ClientError> {
    let line = stdout
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .ok_or_else(|| ClientError::Protocol("bridge printed nothing".to_string()))?;
    let reply: DeployReply = serde_json::from_str(line.trim())
        .map_err(|e| ClientError::Protocol(format!("bad deploy reply {:?}: {}", line, e)))?;
    if reply.identity.trim().is_empty() {
        return Err(ClientError::Protocol("empty identity".to_string()));
    }
    Ok(Identity::new(reply.identity.trim()))
}

#[async_trait]
impl ResourceClient for CommandClient {
    async fn deploy(
        &mut self,
        contract: &str,
        args: &[serde_json::Value],
    ) -> Result<Identity, ClientError> {
        let stdout = self.run(&BridgeRequest::Deploy { contract, args }).await?;
        parse_deploy_reply(&stdout)
    }

    async fn invoke(
        &mut self,
        target: &Identity,
        method: &str,
        args: &[serde_json::Value],
    ) -> Result<(), ClientError> {
        self.run(&BridgeRequest::Invoke {
            target: target.as_str(),
            method,
            args,
        })
        .await
        .map(|_| ())
    }
}
