//! Deserialization of the external wire formats from spec §6 ("Tunable
//! definition record", "Tunable Groups definition") plus the root
//! scheduler config that wraps them, and their conversion into the
//! domain types `ab-core`/`ab-storage`/`ab-optimizer` already operate on.

use ab_core::{
    CovariantGroup, NumericTunableSpec, ObjectiveMap, Tunable, TunableDistribution, TunableGroups,
    TunableValue,
};
use ab_optimizer::BayesianConfig;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum RawTunableDef {
    Int {
        default: i64,
        range: (f64, f64),
        #[serde(default)]
        quantization_bins: Option<u32>,
        #[serde(default)]
        log: bool,
        #[serde(default)]
        special: Vec<i64>,
        #[serde(default)]
        special_weights: Option<Vec<f64>>,
        #[serde(default)]
        range_weight: Option<f64>,
        #[serde(default)]
        distribution: TunableDistribution,
        #[serde(default)]
        meta: BTreeMap<String, serde_json::Value>,
    },
    Float {
        default: f64,
        range: (f64, f64),
        #[serde(default)]
        quantization_bins: Option<u32>,
        #[serde(default)]
        log: bool,
        #[serde(default)]
        special: Vec<f64>,
        #[serde(default)]
        special_weights: Option<Vec<f64>>,
        #[serde(default)]
        range_weight: Option<f64>,
        #[serde(default)]
        distribution: TunableDistribution,
        #[serde(default)]
        meta: BTreeMap<String, serde_json::Value>,
    },
    Categorical {
        default: String,
        values: Vec<String>,
        #[serde(default)]
        values_weights: Option<Vec<f64>>,
        #[serde(default)]
        meta: BTreeMap<String, serde_json::Value>,
    },
}

fn convert_tunable(name: &str, raw: RawTunableDef) -> Result<Tunable> {
    let tunable = match raw {
        RawTunableDef::Int {
            default,
            range,
            quantization_bins,
            log,
            special,
            special_weights,
            range_weight,
            distribution,
            meta,
        } => Tunable::new_numeric(NumericTunableSpec {
            name: name.to_string(),
            is_integer: true,
            default: TunableValue::Int(default),
            range,
            quantization_bins,
            log,
            distribution,
            special: special.into_iter().map(TunableValue::Int).collect(),
            special_weights,
            range_weight,
            meta,
        })?,
        RawTunableDef::Float {
            default,
            range,
            quantization_bins,
            log,
            special,
            special_weights,
            range_weight,
            distribution,
            meta,
        } => Tunable::new_numeric(NumericTunableSpec {
            name: name.to_string(),
            is_integer: false,
            default: TunableValue::Float(default),
            range,
            quantization_bins,
            log,
            distribution,
            special: special.into_iter().map(TunableValue::Float).collect(),
            special_weights,
            range_weight,
            meta,
        })?,
        RawTunableDef::Categorical {
            default,
            values,
            values_weights,
            meta,
        } => Tunable::new_categorical(name, values, default, values_weights, meta)?,
    };
    Ok(tunable)
}

#[derive(Debug, Deserialize)]
struct RawCovariantGroup {
    cost: u64,
    params: BTreeMap<String, RawTunableDef>,
}

/// `group_name -> { cost, params: { tunable_name: TunableDef } }` (spec §6
/// "Tunable Groups definition").
pub type RawTunableGroups = BTreeMap<String, RawCovariantGroup>;

pub fn build_tunable_groups(raw: RawTunableGroups) -> Result<TunableGroups> {
    let mut groups = TunableGroups::new();
    for (group_name, raw_group) in raw {
        let mut tunables = Vec::with_capacity(raw_group.params.len());
        for (tunable_name, raw_tunable) in raw_group.params {
            tunables.push(
                convert_tunable(&tunable_name, raw_tunable)
                    .with_context(|| format!("tunable '{tunable_name}' in group '{group_name}'"))?,
            );
        }
        groups
            .add_group(CovariantGroup::new(group_name.clone(), raw_group.cost, tunables))
            .with_context(|| format!("covariant group '{group_name}'"))?;
    }
    Ok(groups)
}

/// `tunable_name -> value` (spec §6 "Stored tunable value file"). Each
/// `--tunable-values` file is applied in order onto `tg`, later files
/// overriding earlier ones key-by-key, matching the `--globals` overlay
/// convention.
pub fn apply_tunable_value_file(tg: &mut TunableGroups, path: &Path) -> Result<()> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let values: BTreeMap<String, TunableValue> =
        serde_json::from_str(&text).with_context(|| format!("parsing {} as a tunable-value file", path.display()))?;
    for (name, value) in values {
        tg.set(&name, value).with_context(|| format!("applying seed value for '{name}' from {}", path.display()))?;
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum RawStorageConfig {
    Memory,
    Sqlite { path: String },
}

impl Default for RawStorageConfig {
    fn default() -> Self {
        RawStorageConfig::Memory
    }
}

fn default_max_iterations() -> u64 {
    100
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RawOptimizerConfig {
    Random {
        #[serde(default = "default_max_iterations")]
        max_iterations: u64,
        #[serde(default)]
        start_with_defaults: bool,
        #[serde(default)]
        seed: u64,
    },
    Grid {
        #[serde(default = "default_max_iterations")]
        max_iterations: u64,
    },
    Bayesian {
        #[serde(default = "default_max_iterations")]
        max_iterations: u64,
        #[serde(default)]
        start_with_defaults: bool,
        #[serde(default)]
        seed: u64,
        #[serde(default = "default_alpha")]
        alpha: f64,
        #[serde(default = "default_num_candidates")]
        num_candidates: usize,
        #[serde(default = "default_min_samples")]
        min_samples_required: usize,
        #[serde(default)]
        use_llamatune: bool,
    },
}

fn default_alpha() -> f64 {
    BayesianConfig::default().alpha
}

fn default_num_candidates() -> usize {
    BayesianConfig::default().num_candidates
}

fn default_min_samples() -> usize {
    BayesianConfig::default().min_samples_required
}

impl RawOptimizerConfig {
    /// Builds the concrete optimizer this config names, against `template`
    /// (the scheduler's tunable-space template — deep-copied once per
    /// call since each optimizer owns its own copy).
    pub fn build(self, template: &TunableGroups, objectives: &ObjectiveMap) -> Result<Box<dyn ab_optimizer::Optimizer>> {
        let optimizer: Box<dyn ab_optimizer::Optimizer> = match self {
            RawOptimizerConfig::Random { max_iterations, start_with_defaults, seed } => Box::new(
                ab_optimizer::RandomOptimizer::new(template.deep_copy(), objectives.clone(), max_iterations, start_with_defaults, seed),
            ),
            RawOptimizerConfig::Grid { max_iterations } => Box::new(
                ab_optimizer::GridOptimizer::new(template.deep_copy(), objectives.clone(), max_iterations)
                    .context("building grid optimizer")?,
            ),
            RawOptimizerConfig::Bayesian {
                max_iterations,
                start_with_defaults,
                seed,
                alpha,
                num_candidates,
                min_samples_required,
                use_llamatune,
            } => {
                let config = BayesianConfig {
                    seed,
                    alpha,
                    num_candidates,
                    min_samples_required,
                    use_llamatune,
                    ..BayesianConfig::default()
                };
                Box::new(ab_optimizer::BayesianOptimizer::new(
                    template.deep_copy(),
                    objectives.clone(),
                    max_iterations,
                    start_with_defaults,
                    config,
                ))
            }
        };
        Ok(optimizer)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawRunnerConfig {
    pub id: String,
    #[serde(default = "default_metrics")]
    pub metrics: Vec<String>,
    pub seed: Option<u64>,
    #[serde(default = "default_noise_std")]
    pub noise_std: f64,
    pub range: Option<(f64, f64)>,
}

fn default_metrics() -> Vec<String> {
    vec!["score".to_string()]
}

fn default_noise_std() -> f64 {
    0.2
}

#[derive(Debug, Deserialize)]
pub struct RawSchedulerConfig {
    pub experiment_id: String,
    #[serde(default)]
    pub description: String,
    pub root_env_config: String,
    #[serde(default = "default_start_trial_id")]
    pub start_trial_id: i64,
    #[serde(default = "default_do_teardown")]
    pub do_teardown: bool,
    #[serde(default)]
    pub storage: RawStorageConfig,
    pub objectives: ObjectiveMap,
    pub tunable_groups: RawTunableGroups,
    pub optimizer: RawOptimizerConfig,
    pub runners: Vec<RawRunnerConfig>,
}

fn default_start_trial_id() -> i64 {
    1
}

fn default_do_teardown() -> bool {
    true
}

pub fn load_scheduler_config(path: &Path) -> Result<RawSchedulerConfig> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let config: RawSchedulerConfig =
        serde_json::from_str(&text).with_context(|| format!("parsing {} as a scheduler config", path.display()))?;
    if config.runners.is_empty() {
        bail!("scheduler config '{}' must list at least one entry under 'runners'", path.display());
    }
    Ok(config)
}

/// Applies `--globals` overlay files in order, union-with-override by key
/// (spec SPEC_FULL §3, later files win over earlier ones).
pub fn load_globals(paths: &[std::path::PathBuf]) -> Result<ab_environment::GlobalConfig> {
    let mut globals = ab_environment::GlobalConfig::new();
    for path in paths {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let overlay: BTreeMap<String, serde_json::Value> =
            serde_json::from_str(&text).with_context(|| format!("parsing {} as a globals overlay", path.display()))?;
        globals.extend(overlay);
    }
    Ok(globals)
}
