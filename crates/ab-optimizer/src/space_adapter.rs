use crate::config_space::ConfigurationSpace;
use ab_core::TunableType;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Transforms between an optimizer's internal search space and the full
/// tunable dimensionality (spec §4.4 item 1 "Configuration space"). The
/// identity adapter is the default; [`LlamaTuneAdapter`] is an optional
/// low-dimensional linear embedding.
pub trait SpaceAdapter: Send {
    /// Dimensionality of the internal space the optimizer actually
    /// samples and fits a surrogate over.
    fn internal_dimensionality(&self) -> usize;

    /// Draws one point in the internal space.
    fn sample_internal(&self, rng: &mut StdRng) -> Vec<f64>;

    /// Projects an internal-space point onto the full `[0,1]^d` tunable
    /// hypercube.
    fn project(&self, internal: &[f64]) -> Vec<f64>;

    /// Inverse of `project`, used to bring a previously registered
    /// full-space observation back into the internal space a surrogate
    /// fits over. Lossy for `LlamaTuneAdapter` (many full points share one
    /// internal bucket average); exact for the identity adapter.
    fn to_internal(&self, full: &[f64]) -> Vec<f64>;

    /// Whether projecting `internal` forward and back reproduces the same
    /// internal point (within tolerance). A point that fails is resampled
    /// by the caller rather than surfaced as an error.
    fn round_trips(&self, internal: &[f64]) -> bool {
        let _ = internal;
        true
    }
}

/// No-op adapter: the internal space is the full tunable space.
pub struct IdentityAdapter {
    dim: usize,
}

impl IdentityAdapter {
    pub fn new(config_space: &ConfigurationSpace) -> Self {
        IdentityAdapter {
            dim: config_space.dimensionality(),
        }
    }
}

impl SpaceAdapter for IdentityAdapter {
    fn internal_dimensionality(&self) -> usize {
        self.dim
    }

    fn sample_internal(&self, rng: &mut StdRng) -> Vec<f64> {
        (0..self.dim).map(|_| rng.gen_range(0.0..1.0)).collect()
    }

    fn project(&self, internal: &[f64]) -> Vec<f64> {
        internal.to_vec()
    }

    fn to_internal(&self, full: &[f64]) -> Vec<f64> {
        full.to_vec()
    }
}

/// A fixed random linear embedding from a smaller internal space to the
/// full tunable dimensionality, drawn once at construction (spec §4.4
/// item 1, "LlamaTune-style adapter"): each full dimension reads off one
/// internal dimension through a random sign, categorical dimensions are
/// quantized in the internal space, and a configurable fraction of
/// samples are biased toward the `[0,1]` extremes (which the tunable's
/// own special-value handling maps onto its special values on project).
pub struct LlamaTuneAdapter {
    full_dim: usize,
    internal_dim: usize,
    bucket: Vec<usize>,
    sign: Vec<f64>,
    categorical_dims: Vec<bool>,
    special_bias_fraction: f64,
}

impl LlamaTuneAdapter {
    pub fn new(config_space: &ConfigurationSpace, internal_dim: usize, special_bias_fraction: f64, seed: u64) -> Self {
        let full_dim = config_space.dimensionality().max(1);
        let internal_dim = internal_dim.clamp(1, full_dim);
        let mut rng = StdRng::seed_from_u64(seed);
        let bucket: Vec<usize> = (0..full_dim).map(|_| rng.gen_range(0..internal_dim)).collect();
        let sign: Vec<f64> = (0..full_dim).map(|_| if rng.gen_bool(0.5) { 1.0 } else { -1.0 }).collect();
        let categorical_dims = config_space
            .dimensions()
            .iter()
            .map(|t| t.tunable_type() == TunableType::Categorical)
            .collect();
        LlamaTuneAdapter {
            full_dim,
            internal_dim,
            bucket,
            sign,
            categorical_dims,
            special_bias_fraction: special_bias_fraction.clamp(0.0, 1.0),
        }
    }

    fn recover_internal(&self, full: &[f64]) -> Vec<f64> {
        let mut sums = vec![0.0; self.internal_dim];
        let mut counts = vec![0u32; self.internal_dim];
        for i in 0..self.full_dim {
            let b = self.bucket[i];
            let v = if self.sign[i] < 0.0 { 1.0 - full[i] } else { full[i] };
            sums[b] += v;
            counts[b] += 1;
        }
        (0..self.internal_dim)
            .map(|b| if counts[b] > 0 { sums[b] / counts[b] as f64 } else { 0.5 })
            .collect()
    }
}

impl SpaceAdapter for LlamaTuneAdapter {
    fn internal_dimensionality(&self) -> usize {
        self.internal_dim
    }

    fn sample_internal(&self, rng: &mut StdRng) -> Vec<f64> {
        (0..self.internal_dim)
            .map(|_| {
                if rng.gen::<f64>() < self.special_bias_fraction {
                    if rng.gen_bool(0.5) {
                        0.0
                    } else {
                        1.0
                    }
                } else {
                    rng.gen_range(0.0..1.0)
                }
            })
            .collect()
    }

    fn project(&self, internal: &[f64]) -> Vec<f64> {
        (0..self.full_dim)
            .map(|i| {
                let raw = internal[self.bucket[i]];
                let signed = if self.sign[i] < 0.0 { 1.0 - raw } else { raw };
                if self.categorical_dims[i] {
                    (signed * 4.0).round() / 4.0
                } else {
                    signed
                }
            })
            .collect()
    }

    fn to_internal(&self, full: &[f64]) -> Vec<f64> {
        self.recover_internal(full)
    }

    fn round_trips(&self, internal: &[f64]) -> bool {
        let full = self.project(internal);
        let recovered = self.recover_internal(&full);
        internal
            .iter()
            .zip(recovered.iter())
            .all(|(a, b)| (a - b).abs() < 1e-6)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ab_core::{CovariantGroup, NumericTunableSpec, Tunable, TunableGroups, TunableValue};
    use std::collections::BTreeMap;

    fn config_space() -> ConfigurationSpace {
        let mut tg = TunableGroups::new();
        let tunables = (0..6)
            .map(|i| {
                Tunable::new_numeric(NumericTunableSpec {
                    name: format!("x{i}"),
                    is_integer: false,
                    default: TunableValue::Float(0.0),
                    range: (0.0, 1.0),
                    quantization_bins: None,
                    log: false,
                    distribution: Default::default(),
                    special: vec![],
                    special_weights: None,
                    range_weight: None,
                    meta: BTreeMap::new(),
                })
                .unwrap()
            })
            .collect();
        tg.add_group(CovariantGroup::new("g", 1, tunables)).unwrap();
        ConfigurationSpace::from_tunables(&tg)
    }

    #[test]
    fn identity_adapter_is_a_pass_through() {
        let space = config_space();
        let adapter = IdentityAdapter::new(&space);
        assert_eq!(adapter.internal_dimensionality(), 6);
        let mut rng = StdRng::seed_from_u64(1);
        let internal = adapter.sample_internal(&mut rng);
        assert_eq!(adapter.project(&internal), internal);
    }

    #[test]
    fn llamatune_projects_into_full_dimensionality() {
        let space = config_space();
        let adapter = LlamaTuneAdapter::new(&space, 2, 0.0, 7);
        assert_eq!(adapter.internal_dimensionality(), 2);
        let mut rng = StdRng::seed_from_u64(7);
        let internal = adapter.sample_internal(&mut rng);
        let full = adapter.project(&internal);
        assert_eq!(full.len(), 6);
        assert!(full.iter().all(|v| (0.0..=1.0).contains(v)));
    }
}
