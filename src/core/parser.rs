//! Campaign file parsing and validation.
//!
//! Parses campaign.yaml and validates structural constraints:
//! - Version must be "1.0"
//! - Deploy steps name a contract; action steps name a target and method
//! - An action's target and every `{{steps.X.identity}}` it reads are declared
//!   dependencies that deploy something
//! - `{{params.KEY}}` references exist
//! - Export identities point at deploy steps

use super::error::{DeployError, Result};
use super::resolver::{self, TemplateRef};
use super::types::*;
use std::path::Path;

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Parse a campaign file from disk.
pub fn parse_config_file(path: &Path) -> Result<CampaignConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        DeployError::Validation(format!("failed to read {}: {}", path.display(), e))
    })?;
    parse_config(&content)
}

/// Parse a campaign from a YAML string.
pub fn parse_config(yaml: &str) -> Result<CampaignConfig> {
    serde_yaml_ng::from_str(yaml)
        .map_err(|e| DeployError::Validation(format!("YAML parse error: {}", e)))
}

/// Parse and validate, folding all validation errors into one.
pub fn load_campaign(path: &Path) -> Result<CampaignConfig> {
    let config = parse_config_file(path)?;
    let errors = validate_config(&config);
    if errors.is_empty() {
        return Ok(config);
    }
    let joined = errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join("; ");
    Err(DeployError::Validation(joined))
}

/// Validate a parsed campaign. Returns a list of errors (empty = valid).
pub fn validate_config(config: &CampaignConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let mut push = |message: String| errors.push(ValidationError { message });

    if config.version != "1.0" {
        push(format!("version must be \"1.0\", got \"{}\"", config.version));
    }
    if config.name.trim().is_empty() {
        push("name must not be empty".to_string());
    }
    if config.steps.is_empty() {
        push("campaign declares no steps".to_string());
    }
    if config.policy.timeout_secs == 0 {
        push("policy.timeout_secs must be greater than 0".to_string());
    }

    let is_deploy = |id: &str| {
        config
            .steps
            .get(id)
            .is_some_and(|s| s.kind == StepKind::Deploy)
    };

    for (id, step) in &config.steps {
        for dep in &step.depends_on {
            if dep == id {
                push(format!("step '{}' depends on itself", id));
            } else if !config.steps.contains_key(dep) {
                push(format!("step '{}' depends on unknown step '{}'", id, dep));
            }
        }

        if step.timeout_secs == Some(0) {
            push(format!("step '{}' has a zero timeout", id));
        }

        match step.kind {
            StepKind::Deploy => {
                if step.contract.as_deref().is_none_or(str::is_empty) {
                    push(format!("step '{}' (deploy) has no contract", id));
                }
            }
            StepKind::Action => {
                if step.method.as_deref().is_none_or(str::is_empty) {
                    push(format!("step '{}' (action) has no method", id));
                }
                match step.target.as_deref() {
                    None => push(format!("step '{}' (action) has no target", id)),
                    Some(target) => {
                        if !step.depends_on.iter().any(|d| d == target) {
                            push(format!(
                                "step '{}' targets '{}' but does not depend on it",
                                id, target
                            ));
                        }
                        if config.steps.contains_key(target) && !is_deploy(target) {
                            push(format!(
                                "step '{}' targets '{}', which produces no identity",
                                id, target
                            ));
                        }
                    }
                }
            }
        }

        for arg in &step.args {
            match resolver::template_refs(arg) {
                Err(e) => push(format!("step '{}': {}", id, e)),
                Ok(refs) => {
                    for r in refs {
                        match r {
                            TemplateRef::Param(key) if !config.params.contains_key(&key) => {
                                push(format!("step '{}' uses unknown param '{}'", id, key));
                            }
                            TemplateRef::StepIdentity(other) => {
                                if !step.depends_on.contains(&other) {
                                    push(format!(
                                        "step '{}' reads identity of '{}' but does not depend on it",
                                        id, other
                                    ));
                                } else if config.steps.contains_key(&other) && !is_deploy(&other)
                                {
                                    push(format!(
                                        "step '{}' reads identity of '{}', which produces none",
                                        id, other
                                    ));
                                }
                            }
                            TemplateRef::Param(_) => {}
                        }
                    }
                }
            }
        }
    }

    if let Some(ref export) = config.export {
        if export.path.trim().is_empty() {
            push("export.path must not be empty".to_string());
        }
        for (key, step) in &export.identities {
            if !is_export_key(key) {
                push(format!(
                    "export key '{}' must be an identifier ([A-Za-z_][A-Za-z0-9_]*)",
                    key
                ));
            }
            if !is_deploy(step) {
                push(format!(
                    "export key '{}' must reference a deploy step, got '{}'",
                    key, step
                ));
            }
        }
    }

    errors
}

/// Keys become TypeScript constant names and env variable names.
fn is_export_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
version: "1.0"
name: fixed-yield
params:
  token_name: Struct LP Token
steps:
  token:
    kind: deploy
    contract: StructPLP
    args: ["{{params.token_name}}", "SPLP"]
  strategy:
    kind: deploy
    contract: FixedYieldStrategy
    depends_on: [token]
    args: ["{{steps.token.identity}}"]
  grant:
    kind: action
    target: token
    method: addMinter
    depends_on: [token, strategy]
    args: ["{{steps.strategy.identity}}", true]
export:
  path: out.ts
  identities:
    fixedYieldAddress: strategy
"#;

    fn messages(yaml: &str) -> Vec<String> {
        let config = parse_config(yaml).unwrap();
        validate_config(&config)
            .into_iter()
            .map(|e| e.message)
            .collect()
    }

    #[test]
    fn test_parser_parse_valid() {
        let config = parse_config(VALID).unwrap();
        assert_eq!(config.steps.len(), 3);
        assert!(validate_config(&config).is_empty());
    }

    #[test]
    fn test_parser_bad_yaml() {
        let err = parse_config("steps: [unclosed").unwrap_err();
        assert!(err.to_string().contains("YAML parse error"));
    }

    #[test]
    fn test_parser_bad_version_and_name() {
        let errs = messages(
            r#"
version: "2.0"
name: ""
steps:
  a: { kind: deploy, contract: A }
"#,
        );
        assert!(errs.iter().any(|e| e.contains("version")));
        assert!(errs.iter().any(|e| e.contains("name")));
    }

    #[test]
    fn test_parser_no_steps() {
        let errs = messages("version: \"1.0\"\nname: x\nsteps: {}\n");
        assert!(errs.iter().any(|e| e.contains("no steps")));
    }

    #[test]
    fn test_parser_missing_contract_and_method() {
        let errs = messages(
            r#"
version: "1.0"
name: x
steps:
  a: { kind: deploy }
  b: { kind: action, target: a, depends_on: [a] }
"#,
        );
        assert!(errs.iter().any(|e| e.contains("'a' (deploy) has no contract")));
        assert!(errs.iter().any(|e| e.contains("'b' (action) has no method")));
    }

    #[test]
    fn test_parser_target_must_be_dependency() {
        let errs = messages(
            r#"
version: "1.0"
name: x
steps:
  a: { kind: deploy, contract: A }
  b: { kind: action, target: a, method: m }
"#,
        );
        assert!(errs.iter().any(|e| e.contains("does not depend on it")));
    }

    #[test]
    fn test_parser_identity_ref_must_be_dependency() {
        let errs = messages(
            r#"
version: "1.0"
name: x
steps:
  a: { kind: deploy, contract: A }
  b: { kind: deploy, contract: B, args: ["{{steps.a.identity}}"] }
"#,
        );
        assert_eq!(errs.len(), 1);
        assert!(errs[0].contains("reads identity of 'a'"));
    }

    #[test]
    fn test_parser_identity_of_action_rejected() {
        let errs = messages(
            r#"
version: "1.0"
name: x
steps:
  a: { kind: deploy, contract: A }
  wire: { kind: action, target: a, method: m, depends_on: [a] }
  b: { kind: deploy, contract: B, depends_on: [wire], args: ["{{steps.wire.identity}}"] }
"#,
        );
        assert!(errs.iter().any(|e| e.contains("produces none")));
    }

    #[test]
    fn test_parser_unknown_param_and_dependency() {
        let errs = messages(
            r#"
version: "1.0"
name: x
steps:
  a: { kind: deploy, contract: A, depends_on: [ghost, a], args: ["{{params.nope}}"] }
"#,
        );
        assert!(errs.iter().any(|e| e.contains("unknown step 'ghost'")));
        assert!(errs.iter().any(|e| e.contains("depends on itself")));
        assert!(errs.iter().any(|e| e.contains("unknown param 'nope'")));
    }

    #[test]
    fn test_parser_export_must_reference_deploy() {
        let errs = messages(
            r#"
version: "1.0"
name: x
steps:
  a: { kind: deploy, contract: A }
export:
  path: out.env
  format: env
  identities:
    A_ADDR: a
    MISSING: zz
"#,
        );
        assert_eq!(errs.len(), 1);
        assert!(errs[0].contains("MISSING"));
    }

    #[test]
    fn test_parser_export_key_must_be_identifier() {
        let errs = messages(
            r#"
version: "1.0"
name: x
steps:
  a: { kind: deploy, contract: A }
export:
  path: out.env
  format: env
  identities:
    good_Key1: a
    "bad key": a
    "x=1\nEVIL": a
    9lives: a
"#,
        );
        assert_eq!(errs.len(), 3);
        assert!(errs.iter().all(|e| e.contains("must be an identifier")));
        assert!(errs.iter().any(|e| e.contains("'bad key'")));
        assert!(errs.iter().any(|e| e.contains("'9lives'")));
    }

    #[test]
    fn test_parser_zero_timeouts() {
        let errs = messages(
            r#"
version: "1.0"
name: x
policy:
  timeout_secs: 0
steps:
  a: { kind: deploy, contract: A, timeout_secs: 0 }
"#,
        );
        assert_eq!(errs.len(), 2);
    }

    #[test]
    fn test_parser_load_campaign_joins_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("campaign.yaml");
        std::fs::write(&path, "version: \"9\"\nname: \"\"\nsteps: {}\n").unwrap();
        let err = load_campaign(&path).unwrap_err();
        assert!(matches!(err, DeployError::Validation(_)));
        assert!(err.to_string().contains("; "));
    }

    #[test]
    fn test_parser_load_missing_file() {
        let err = load_campaign(Path::new("/nonexistent/campaign.yaml")).unwrap_err();
        assert!(err.to_string().contains("failed to read"));
    }
}
