//! Template binding and dependency DAG construction.
//!
//! Resolves `{{params.key}}` and `{{steps.id.identity}}` templates in step
//! arguments. Builds a DAG from explicit depends_on edges and computes the
//! plan with Kahn's algorithm, breaking ties by declaration order so the same
//! campaign file always yields the same plan.

use super::error::{DeployError, Result};
use super::types::*;
use indexmap::IndexMap;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

/// A placeholder found in a template string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateRef {
    Param(String),
    StepIdentity(String),
}

/// Parse a placeholder body such as `steps.token.identity`.
fn parse_ref(key: &str) -> std::result::Result<TemplateRef, String> {
    if let Some(param) = key.strip_prefix("params.") {
        if param.is_empty() {
            return Err("empty param name".to_string());
        }
        return Ok(TemplateRef::Param(param.to_string()));
    }
    if let Some(rest) = key.strip_prefix("steps.") {
        return match rest.rsplit_once('.') {
            Some((step, "identity")) if !step.is_empty() => {
                Ok(TemplateRef::StepIdentity(step.to_string()))
            }
            Some((_, field)) => Err(format!("unknown step field: {}", field)),
            None => Err(format!("invalid step ref: {}", key)),
        };
    }
    Err(format!("unknown template variable: {}", key))
}

/// Split a template into literal text and placeholder refs.
fn scan_template(template: &str) -> std::result::Result<Vec<(usize, usize, TemplateRef)>, String> {
    let mut refs = Vec::new();
    let mut start = 0;
    while let Some(open) = template[start..].find("{{") {
        let open = start + open;
        let close = template[open..]
            .find("}}")
            .ok_or_else(|| format!("unclosed template at position {}", open))?;
        let close = open + close + 2;
        let key = template[open + 2..close - 2].trim();
        refs.push((open, close, parse_ref(key)?));
        start = close;
    }
    Ok(refs)
}

/// Collect every placeholder used anywhere inside an argument value.
pub fn template_refs(value: &serde_json::Value) -> std::result::Result<Vec<TemplateRef>, String> {
    let mut out = Vec::new();
    collect_refs(value, &mut out)?;
    Ok(out)
}

fn collect_refs(
    value: &serde_json::Value,
    out: &mut Vec<TemplateRef>,
) -> std::result::Result<(), String> {
    match value {
        serde_json::Value::String(s) => {
            out.extend(scan_template(s)?.into_iter().map(|(_, _, r)| r));
        }
        serde_json::Value::Array(items) => {
            for item in items {
                collect_refs(item, out)?;
            }
        }
        serde_json::Value::Object(map) => {
            for item in map.values() {
                collect_refs(item, out)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn lookup(
    r: &TemplateRef,
    params: &IndexMap<String, serde_json::Value>,
    identities: &IndexMap<String, Identity>,
) -> std::result::Result<serde_json::Value, String> {
    match r {
        TemplateRef::Param(key) => params
            .get(key)
            .cloned()
            .ok_or_else(|| format!("unknown param: {}", key)),
        TemplateRef::StepIdentity(step) => identities
            .get(step)
            .map(|id| serde_json::Value::String(id.to_string()))
            .ok_or_else(|| format!("no recorded identity for step: {}", step)),
    }
}

/// Resolve all template variables in a string.
pub fn resolve_template(
    template: &str,
    params: &IndexMap<String, serde_json::Value>,
    identities: &IndexMap<String, Identity>,
) -> std::result::Result<String, String> {
    let refs = scan_template(template)?;
    let mut result = String::with_capacity(template.len());
    let mut cursor = 0;
    for (open, close, r) in refs {
        result.push_str(&template[cursor..open]);
        result.push_str(&json_value_to_string(&lookup(&r, params, identities)?));
        cursor = close;
    }
    result.push_str(&template[cursor..]);
    Ok(result)
}

/// Bind one argument value. A string that is exactly one placeholder takes
/// the referenced value verbatim, so numeric and boolean params keep their type.
pub fn bind_value(
    value: &serde_json::Value,
    params: &IndexMap<String, serde_json::Value>,
    identities: &IndexMap<String, Identity>,
) -> std::result::Result<serde_json::Value, String> {
    match value {
        serde_json::Value::String(s) => {
            let refs = scan_template(s)?;
            if let [(0, close, r)] = refs.as_slice() {
                if *close == s.len() {
                    return lookup(r, params, identities);
                }
            }
            let bound = resolve_template(s, params, identities)?;
            Ok(serde_json::Value::String(bound))
        }
        serde_json::Value::Array(items) => items
            .iter()
            .map(|item| bind_value(item, params, identities))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map(serde_json::Value::Array),
        serde_json::Value::Object(map) => {
            let mut bound = serde_json::Map::new();
            for (k, v) in map {
                bound.insert(k.clone(), bind_value(v, params, identities)?);
            }
            Ok(serde_json::Value::Object(bound))
        }
        other => Ok(other.clone()),
    }
}

/// Bind a step into a concrete call using the identities known so far.
pub fn bind_step(
    step: &PlanStep,
    params: &IndexMap<String, serde_json::Value>,
    identities: &IndexMap<String, Identity>,
) -> Result<BoundCall> {
    let err = |detail: String| DeployError::Binding {
        step: step.id.clone(),
        detail,
    };
    let args = step
        .spec
        .args
        .iter()
        .map(|a| bind_value(a, params, identities))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(err)?;

    match step.spec.kind {
        StepKind::Deploy => {
            let contract = step
                .spec
                .contract
                .clone()
                .ok_or_else(|| err("deploy step has no contract".to_string()))?;
            Ok(BoundCall::Deploy { contract, args })
        }
        StepKind::Action => {
            let target_step = step
                .spec
                .target
                .as_deref()
                .ok_or_else(|| err("action step has no target".to_string()))?;
            let target = identities
                .get(target_step)
                .cloned()
                .ok_or_else(|| err(format!("no recorded identity for target: {}", target_step)))?;
            let method = step
                .spec
                .method
                .clone()
                .ok_or_else(|| err("action step has no method".to_string()))?;
            Ok(BoundCall::Invoke {
                target,
                method,
                args,
            })
        }
    }
}

/// Build the execution plan from step dependencies.
/// Uses Kahn's algorithm with declaration-order tie-breaking for determinism.
pub fn build_plan(config: &CampaignConfig) -> Result<Plan> {
    let ids: Vec<&String> = config.steps.keys().collect();
    let index: HashMap<&str, usize> = ids
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i))
        .collect();

    let mut in_degree = vec![0usize; ids.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); ids.len()];

    for (i, spec) in config.steps.values().enumerate() {
        for dep in &spec.depends_on {
            let d = *index
                .get(dep.as_str())
                .ok_or_else(|| DeployError::UnknownDependency {
                    step: ids[i].clone(),
                    dependency: dep.clone(),
                })?;
            dependents[d].push(i);
            in_degree[i] += 1;
        }
    }

    // Min-heap on declaration index
    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, &d)| d == 0)
        .map(|(i, _)| Reverse(i))
        .collect();

    let mut order = Vec::with_capacity(ids.len());
    while let Some(Reverse(current)) = ready.pop() {
        order.push(current);
        for &next in &dependents[current] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.push(Reverse(next));
            }
        }
    }

    if order.len() != ids.len() {
        return Err(DeployError::CycleDetected {
            steps: cycle_members(config, &in_degree),
        });
    }

    let steps = order
        .into_iter()
        .filter_map(|i| {
            config.steps.get_index(i).map(|(id, spec)| PlanStep {
                id: id.clone(),
                spec: spec.clone(),
            })
        })
        .collect();

    Ok(Plan {
        campaign: config.name.clone(),
        steps,
    })
}

/// Narrow the unsorted remainder to steps on or between cycles by
/// repeatedly dropping steps with no dependents left in the remainder.
fn cycle_members(config: &CampaignConfig, in_degree: &[usize]) -> Vec<String> {
    let mut remaining: Vec<bool> = in_degree.iter().map(|&d| d > 0).collect();
    loop {
        let mut changed = false;
        for i in 0..remaining.len() {
            if !remaining[i] {
                continue;
            }
            let Some((id, _)) = config.steps.get_index(i) else {
                continue;
            };
            let feeds_remaining = config.steps.values().enumerate().any(|(j, spec)| {
                remaining[j] && spec.depends_on.iter().any(|d| d == id)
            });
            if !feeds_remaining {
                remaining[i] = false;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    config
        .steps
        .keys()
        .zip(remaining)
        .filter(|(_, r)| *r)
        .map(|(id, _)| id.clone())
        .collect()
}

/// Convert a JSON value to template text.
pub fn json_value_to_string(val: &serde_json::Value) -> String {
    match val {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}
