//! Exporter: publish recorded identities to a downstream file.
//!
//! Best-effort bookkeeping. A failed export never touches the ledger.

use crate::core::error::{DeployError, Result};
use crate::core::types::{ExportConfig, ExportFormat, Identity, StepStatus};
use crate::ledger::Ledger;
use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use tracing::info;

/// Resolve the export path; relative paths are taken from the campaign file's directory.
pub fn export_path(export: &ExportConfig, base_dir: &Path) -> PathBuf {
    let path = Path::new(&export.path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

/// Select the configured identities from the ledger, in configuration order.
pub fn collect_identities(
    export: &ExportConfig,
    ledger: &Ledger,
    path: &Path,
) -> Result<IndexMap<String, Identity>> {
    let failed: Vec<String> = ledger
        .outcomes()
        .into_iter()
        .filter(|o| o.status == StepStatus::Failed)
        .map(|o| o.step)
        .collect();
    if !failed.is_empty() {
        return Err(DeployError::ExportFailed {
            path: path.to_path_buf(),
            detail: format!("ledger has failed steps: {}", failed.join(", ")),
        });
    }

    let recorded = ledger.identities();
    export
        .identities
        .iter()
        .map(|(key, step)| {
            let id = recorded
                .get(step)
                .cloned()
                .ok_or_else(|| DeployError::ExportFailed {
                    path: path.to_path_buf(),
                    detail: format!("no recorded identity for step '{}' (key {})", step, key),
                })?;
            if id.as_str().chars().any(|c| c.is_whitespace() || c.is_control()) {
                return Err(DeployError::ExportFailed {
                    path: path.to_path_buf(),
                    detail: format!(
                        "identity of step '{}' is not a single token: {:?}",
                        step,
                        id.as_str()
                    ),
                });
            }
            Ok((key.clone(), id))
        })
        .collect()
}

/// Render identities in the requested format.
pub fn render(format: ExportFormat, identities: &IndexMap<String, Identity>) -> String {
    match format {
        ExportFormat::Typescript => {
            let mut out = String::from("// Generated by chainplan. Do not edit.\n");
            for (key, id) in identities {
                let literal = serde_json::Value::String(id.to_string());
                out.push_str(&format!("export const {}: string = {};\n", key, literal));
            }
            out
        }
        ExportFormat::Env => identities
            .iter()
            .map(|(key, id)| format!("{}={}\n", key, id))
            .collect(),
        ExportFormat::Json => {
            let map: serde_json::Map<String, serde_json::Value> = identities
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.to_string())))
                .collect();
            let mut out = serde_json::to_string_pretty(&serde_json::Value::Object(map))
                .unwrap_or_else(|_| "{}".to_string());
            out.push('\n');
            out
        }
    }
}

/// Write the export file atomically. Returns the path written.
pub fn export(export: &ExportConfig, ledger: &Ledger, base_dir: &Path) -> Result<PathBuf> {
    let path = export_path(export, base_dir);
    let identities = collect_identities(export, ledger, &path)?;
    let body = render(export.format, &identities);

    let io_err = |e: std::io::Error| DeployError::ExportFailed {
        path: path.clone(),
        detail: e.to_string(),
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    // Atomic write: temp file + rename
    let mut tmp = path.clone().into_os_string();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, body).map_err(io_err)?;
    std::fs::rename(&tmp, &path).map_err(io_err)?;

    info!(path = %path.display(), identities = identities.len(), "exported identities");
    Ok(path)
}
