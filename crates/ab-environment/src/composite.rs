use crate::environment::{expand_group_refs, expand_vars, names_resolved_by, ConstArgs, Environment, GlobalConfig};
use crate::error::{EnvResult, EnvironmentError};
use crate::state::StateMachine;
use ab_core::{ScoreMap, Status, TunableGroups};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// One child of a [`CompositeEnvironment`]: an owned environment plus the
/// subset of tunable groups and constant arguments it is constructed
/// against. `tunable_group_refs` entries are either concrete covariant
/// group names or a `$short` reference resolved against the global
/// config's `tunable_params_map` at construction time.
pub struct CompositeChild {
    pub environment: Box<dyn Environment>,
    pub tunable_group_refs: Vec<String>,
    pub const_args: ConstArgs,
}

/// Composes child environments with a single tunable-group subset and
/// constant-argument map each; required arguments flow from parent to
/// child by name. Children run `setup`/`run`/`teardown` in declaration
/// order; `teardown` runs in reverse, even if an earlier child failed
/// (spec §4.3 "Composite environments").
pub struct CompositeEnvironment {
    name: String,
    children: Vec<CompositeChild>,
    resolved_group_names: Vec<Vec<String>>,
    const_args: ConstArgs,
    state: StateMachine,
}

/// Reads the `tunable_params_map` (`short_name -> [group_name, ...]`)
/// table out of the global config overlay, if present.
fn tunable_params_map(global_config: &GlobalConfig) -> BTreeMap<String, Vec<String>> {
    global_config
        .get("tunable_params_map")
        .and_then(|v| v.as_object())
        .map(|obj| {
            obj.iter()
                .filter_map(|(k, v)| {
                    let groups: Vec<String> = v
                        .as_array()?
                        .iter()
                        .filter_map(|g| g.as_str().map(str::to_string))
                        .collect();
                    Some((k.clone(), groups))
                })
                .collect()
        })
        .unwrap_or_default()
}

impl CompositeEnvironment {
    /// Validates, at construction, that every child's `required_args()`
    /// is covered by the parent's const args, the global config overlay,
    /// or a tunable name — matching the original's
    /// `req_args = required_args - tunable_param_names` check. Any
    /// unresolved name is `MissingRequiredParam`, raised eagerly, before
    /// any `setup` call. Also resolves each child's `$group` references
    /// once here, rather than on every `setup` call.
    pub fn new(
        name: impl Into<String>,
        children: Vec<CompositeChild>,
        const_args: ConstArgs,
        global_config: &GlobalConfig,
        tunables: &TunableGroups,
    ) -> EnvResult<Self> {
        let name = name.into();
        let resolved = names_resolved_by(&const_args, global_config, tunables);
        for child in &children {
            for required in child.environment.required_args() {
                if !resolved.contains(&required) && !child.const_args.contains_key(&required) {
                    return Err(EnvironmentError::MissingRequiredParam {
                        environment: name.clone(),
                        name: required,
                    });
                }
            }
        }
        let groups_map = tunable_params_map(global_config);
        let resolved_group_names = children
            .iter()
            .map(|child| expand_group_refs(&name, &child.tunable_group_refs, &groups_map))
            .collect::<EnvResult<Vec<_>>>()?;
        Ok(CompositeEnvironment {
            name,
            children,
            resolved_group_names,
            const_args,
            state: StateMachine::new(),
        })
    }
}

impl Environment for CompositeEnvironment {
    fn name(&self) -> &str {
        &self.name
    }

    fn required_args(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .children
            .iter()
            .flat_map(|c| c.environment.required_args())
            .filter(|name| !self.const_args.contains_key(name))
            .collect();
        out.sort();
        out.dedup();
        out
    }

    fn enter_context(&mut self) -> EnvResult<()> {
        self.state.enter_context();
        for child in &mut self.children {
            child.environment.enter_context()?;
        }
        Ok(())
    }

    fn exit_context(&mut self) -> EnvResult<()> {
        let mut first_err = None;
        for child in self.children.iter_mut().rev() {
            if let Err(e) = child.environment.exit_context() {
                first_err.get_or_insert(e);
            }
        }
        self.state.exit_context();
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn setup(&mut self, tunables: &TunableGroups, global_config: &GlobalConfig) -> EnvResult<bool> {
        let hash = tunables.content_hash();
        if self.state.begin_setup(&hash)? {
            return Ok(true);
        }
        for (child, group_names) in self.children.iter_mut().zip(self.resolved_group_names.iter()) {
            let sub = tunables
                .subgroup(&group_names.iter().map(String::as_str).collect::<Vec<_>>())
                .map_err(|e| EnvironmentError::Internal(e.to_string()))?;
            let merged_globals = merge_const_args_into_globals(&child.const_args, global_config)?;
            if !child.environment.setup(&sub, &merged_globals)? {
                return Ok(false);
            }
        }
        self.state.mark_ready(hash);
        Ok(true)
    }

    fn run(&mut self) -> EnvResult<(Status, DateTime<Utc>, Option<ScoreMap>)> {
        self.state.require_ready("run")?;
        self.state.mark_running();
        let mut last = (Status::Succeeded, Utc::now(), Some(ScoreMap::new()));
        for child in &mut self.children {
            let (status, ts, metrics) = child.environment.run()?;
            last = (status, ts, metrics.clone());
            if !status.is_succeeded() {
                self.state.mark_ready_after_run();
                return Ok((status, ts, None));
            }
            if let Some(m) = metrics {
                if let Some(existing) = last.2.as_mut() {
                    existing.extend(m);
                }
            }
        }
        self.state.mark_ready_after_run();
        Ok(last)
    }

    fn status(&mut self) -> EnvResult<(Status, DateTime<Utc>, Vec<(DateTime<Utc>, String, f64)>)> {
        let mut worst = Status::Succeeded;
        let mut ts = Utc::now();
        let mut triples = Vec::new();
        for child in &mut self.children {
            let (status, child_ts, mut child_triples) = child.environment.status()?;
            ts = child_ts;
            triples.append(&mut child_triples);
            if status_rank(status) > status_rank(worst) {
                worst = status;
            }
        }
        Ok((worst, ts, triples))
    }

    fn teardown(&mut self) -> EnvResult<()> {
        let mut first_err = None;
        for child in self.children.iter_mut().rev() {
            if let Err(e) = child.environment.teardown() {
                first_err.get_or_insert(e);
            }
        }
        self.state.teardown();
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn merge_const_args_into_globals(
    const_args: &ConstArgs,
    global_config: &GlobalConfig,
) -> EnvResult<GlobalConfig> {
    let mut merged = global_config.clone();
    for (k, v) in const_args {
        let expanded = expand_vars("composite", v, global_config)?;
        merged.insert(k.clone(), expanded);
    }
    Ok(merged)
}

/// Orders statuses so that `status()` can report the "worst" across
/// children: terminal failure outranks still-running, which outranks
/// success.
fn status_rank(status: Status) -> u8 {
    match status {
        Status::Failed | Status::TimedOut | Status::Canceled => 3,
        Status::Running => 2,
        Status::Pending | Status::Ready | Status::Unknown => 1,
        Status::Succeeded => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockEnvironment, MockScript};
    use ab_core::{CovariantGroup, NumericTunableSpec, Tunable, TunableValue};
    use std::collections::BTreeMap;

    fn tunables() -> TunableGroups {
        let t = Tunable::new_numeric(NumericTunableSpec {
            name: "x".into(),
            is_integer: true,
            default: TunableValue::Int(0),
            range: (0.0, 10.0),
            quantization_bins: None,
            log: false,
            distribution: Default::default(),
            special: vec![],
            special_weights: None,
            range_weight: None,
            meta: BTreeMap::new(),
        })
        .unwrap();
        let mut tg = TunableGroups::new();
        tg.add_group(CovariantGroup::new("g", 1, vec![t])).unwrap();
        tg
    }

    fn child(name: &str) -> CompositeChild {
        CompositeChild {
            environment: Box::new(MockEnvironment::new(name, MockScript::default())),
            tunable_group_refs: vec!["g".to_string()],
            const_args: ConstArgs::new(),
        }
    }

    #[test]
    fn runs_children_in_order_and_tears_down_in_reverse() {
        let tg = tunables();
        let mut composite = CompositeEnvironment::new(
            "composite",
            vec![child("a"), child("b")],
            ConstArgs::new(),
            &GlobalConfig::new(),
            &tg,
        )
        .unwrap();
        composite.enter_context().unwrap();
        assert!(composite.setup(&tg, &GlobalConfig::new()).unwrap());
        let (status, _, _) = composite.run().unwrap();
        assert_eq!(status, Status::Succeeded);
        composite.teardown().unwrap();
        composite.exit_context().unwrap();
    }

    #[test]
    fn propagates_child_failure_without_metrics() {
        let tg = tunables();
        let failing = CompositeChild {
            environment: Box::new(MockEnvironment::new(
                "failing",
                MockScript {
                    run_status: Status::Failed,
                    ..Default::default()
                },
            )),
            tunable_group_refs: vec!["g".to_string()],
            const_args: ConstArgs::new(),
        };
        let mut composite = CompositeEnvironment::new(
            "composite",
            vec![child("a"), failing, child("c")],
            ConstArgs::new(),
            &GlobalConfig::new(),
            &tg,
        )
        .unwrap();
        composite.enter_context().unwrap();
        composite.setup(&tg, &GlobalConfig::new()).unwrap();
        let (status, _, metrics) = composite.run().unwrap();
        assert_eq!(status, Status::Failed);
        assert!(metrics.is_none());
    }
}
