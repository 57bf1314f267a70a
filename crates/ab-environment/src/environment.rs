use crate::error::{EnvResult, EnvironmentError};
use ab_core::{ScoreMap, Status, TunableGroups};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Flat JSON-valued overlay passed to every `Environment` construction
/// (spec §6 `--globals` overlay: later files override earlier ones
/// key-by-key, union not deep merge).
pub type GlobalConfig = BTreeMap<String, serde_json::Value>;

/// Constant (non-tunable) arguments an environment is constructed with.
pub type ConstArgs = BTreeMap<String, serde_json::Value>;

/// The polymorphic target-system abstraction (spec C6), carried through
/// `enter_context -> setup -> run -> status -> teardown -> exit_context`.
///
/// Implementations must make `setup` idempotent for repeated calls with an
/// identical tunable assignment, and `teardown` idempotent regardless of
/// current phase; [`crate::state::StateMachine`] enforces both.
pub trait Environment: Send {
    fn name(&self) -> &str;

    /// Every global-config or tunable name this environment (or, for a
    /// composite environment, the union of its children) requires but does
    /// not itself supply via const args. Used at construction time to
    /// eagerly detect `MissingRequiredParam` before any `setup` call.
    fn required_args(&self) -> Vec<String> {
        Vec::new()
    }

    /// Scoped acquisition of service collaborators. Idempotent.
    fn enter_context(&mut self) -> EnvResult<()>;

    /// Guaranteed release of service collaborators on every exit path.
    /// Idempotent.
    fn exit_context(&mut self) -> EnvResult<()>;

    /// Brings the environment to `Ready` for the given tunable assignment.
    /// Idempotent: a repeated call with the same tunables is a no-op.
    /// Returns `false` if the environment could not be brought to `Ready`
    /// (the caller then reports the trial `Failed`).
    fn setup(&mut self, tunables: &TunableGroups, global_config: &GlobalConfig) -> EnvResult<bool>;

    /// Must only be called while `Ready`. Returns `Some(metrics)` only
    /// when the returned status is a terminal success.
    fn run(&mut self) -> EnvResult<(Status, DateTime<Utc>, Option<ScoreMap>)>;

    /// May be polled at any time after `enter_context`. Returns telemetry
    /// observed since the previous call (possibly empty).
    fn status(&mut self) -> EnvResult<(Status, DateTime<Utc>, Vec<(DateTime<Utc>, String, f64)>)>;

    /// Idempotent; returns the environment to Uninit-in-context.
    fn teardown(&mut self) -> EnvResult<()>;
}

/// Resolves `$group`-prefixed covariant-group references against the
/// `tunable_params_map` (a `short_name -> [concrete group names, ...]`
/// table carried in the global config): `$short` expands to every group
/// name the map lists for `short`; any other entry is assumed already a
/// concrete covariant group name and passes through unchanged. This
/// expansion happens once, at Environment construction time, before
/// calling `TunableGroups::subgroup` (spec SPEC_FULL §3, "`$group`
/// tunable-parameter references"; original: `Environment._expand_groups`).
pub fn expand_group_refs(
    environment: &str,
    group_refs: &[String],
    tunable_params_map: &BTreeMap<String, Vec<String>>,
) -> EnvResult<Vec<String>> {
    let mut out = Vec::new();
    for entry in group_refs {
        if let Some(short) = entry.strip_prefix('$') {
            let groups = tunable_params_map.get(short).ok_or_else(|| EnvironmentError::MissingRequiredParam {
                environment: environment.to_string(),
                name: entry.clone(),
            })?;
            out.extend(groups.iter().cloned());
        } else {
            out.push(entry.clone());
        }
    }
    out.sort();
    out.dedup();
    Ok(out)
}

/// Resolves `$name` placeholders inside a JSON value against the global
/// config overlay (spec SPEC_FULL §3, "`$var` templating in const args").
/// A bare `"$name"` string is replaced wholesale by the referenced value
/// (preserving its type); placeholders nested inside a longer string are
/// substituted textually. An unresolved placeholder is
/// `MissingRequiredParam`.
pub fn expand_vars(
    environment: &str,
    value: &serde_json::Value,
    global_config: &GlobalConfig,
) -> EnvResult<serde_json::Value> {
    match value {
        serde_json::Value::String(s) => expand_string(environment, s, global_config),
        serde_json::Value::Array(items) => Ok(serde_json::Value::Array(
            items
                .iter()
                .map(|v| expand_vars(environment, v, global_config))
                .collect::<EnvResult<Vec<_>>>()?,
        )),
        serde_json::Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                out.insert(k.clone(), expand_vars(environment, v, global_config)?);
            }
            Ok(serde_json::Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

fn expand_string(
    environment: &str,
    s: &str,
    global_config: &GlobalConfig,
) -> EnvResult<serde_json::Value> {
    if let Some(name) = s.strip_prefix('$') {
        if !name.contains(' ') && !name.is_empty() {
            return global_config.get(name).cloned().ok_or_else(|| {
                EnvironmentError::MissingRequiredParam {
                    environment: environment.to_string(),
                    name: name.to_string(),
                }
            });
        }
    }
    // Textual substitution for `$name` occurring within a longer string.
    let mut result = String::new();
    let mut rest = s;
    while let Some(idx) = rest.find('$') {
        result.push_str(&rest[..idx]);
        let after = &rest[idx + 1..];
        let end = after
            .find(|c: char| !(c.is_alphanumeric() || c == '_'))
            .unwrap_or(after.len());
        if end == 0 {
            result.push('$');
            rest = after;
            continue;
        }
        let name = &after[..end];
        let replacement = global_config.get(name).ok_or_else(|| EnvironmentError::MissingRequiredParam {
            environment: environment.to_string(),
            name: name.to_string(),
        })?;
        result.push_str(&json_to_plain_string(replacement));
        rest = &after[end..];
    }
    result.push_str(rest);
    Ok(serde_json::Value::String(result))
}

fn json_to_plain_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Union of globals, the environment's own const args, and the tunable
/// names, matching `mlos_bench`'s `merge_parameters` (union-with-override,
/// not deep merge): used by every `Environment::required_args` caller to
/// decide which names are already resolvable.
pub fn names_resolved_by(
    const_args: &ConstArgs,
    global_config: &GlobalConfig,
    tunables: &TunableGroups,
) -> std::collections::HashSet<String> {
    let mut resolved: std::collections::HashSet<String> = const_args.keys().cloned().collect();
    resolved.extend(global_config.keys().cloned());
    resolved.extend(tunables.iter_values().into_iter().map(|(n, _)| n));
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_vars_resolves_bare_placeholder_preserving_type() {
        let mut globals = GlobalConfig::new();
        globals.insert("port".to_string(), serde_json::json!(5432));
        let resolved = expand_vars("env", &serde_json::json!("$port"), &globals).unwrap();
        assert_eq!(resolved, serde_json::json!(5432));
    }

    #[test]
    fn expand_vars_substitutes_inline_placeholder_textually() {
        let mut globals = GlobalConfig::new();
        globals.insert("host".to_string(), serde_json::json!("db1"));
        let resolved = expand_vars("env", &serde_json::json!("jdbc://$host:5432"), &globals).unwrap();
        assert_eq!(resolved, serde_json::json!("jdbc://db1:5432"));
    }

    #[test]
    fn expand_vars_missing_placeholder_is_missing_required_param() {
        let globals = GlobalConfig::new();
        let err = expand_vars("env", &serde_json::json!("$nope"), &globals);
        assert!(matches!(err, Err(EnvironmentError::MissingRequiredParam { .. })));
    }
}
