use rand::rngs::StdRng;
use rand::Rng;

/// Searches for the argmax of an acquisition function over the internal
/// search space (spec §4.4 item 3, grounded on `UtilityFunctionOptimizers`).
/// Implementations own their own candidate generation strategy; the
/// Bayesian optimizer supplies the acquisition function to score with.
pub trait CandidateSubOptimizer: Send {
    /// Returns the best candidate point found and its acquisition score.
    fn argmax(&self, internal_dim: usize, rng: &mut StdRng, acquisition: &dyn Fn(&[f64]) -> f64) -> (Vec<f64>, f64);
}

/// Draws `num_candidates` independent uniform samples and keeps the best.
pub struct RandomSearchSubOptimizer {
    pub num_candidates: usize,
}

impl RandomSearchSubOptimizer {
    pub fn new(num_candidates: usize) -> Self {
        RandomSearchSubOptimizer {
            num_candidates: num_candidates.max(1),
        }
    }
}

impl CandidateSubOptimizer for RandomSearchSubOptimizer {
    fn argmax(&self, internal_dim: usize, rng: &mut StdRng, acquisition: &dyn Fn(&[f64]) -> f64) -> (Vec<f64>, f64) {
        let mut best: Option<(Vec<f64>, f64)> = None;
        for _ in 0..self.num_candidates {
            let point: Vec<f64> = (0..internal_dim).map(|_| rng.gen_range(0.0..1.0)).collect();
            let score = acquisition(&point);
            if best.as_ref().map(|(_, s)| score > *s).unwrap_or(true) {
                best = Some((point, score));
            }
        }
        best.unwrap_or_else(|| (vec![0.5; internal_dim], f64::NEG_INFINITY))
    }
}

/// Perturbs the current incumbent within a shrinking radius for a fixed
/// number of rounds, keeping the best point seen.
pub struct RandomNearIncumbentSubOptimizer {
    pub incumbent: Vec<f64>,
    pub num_rounds: usize,
    pub initial_radius: f64,
}

impl RandomNearIncumbentSubOptimizer {
    pub fn new(incumbent: Vec<f64>, num_rounds: usize, initial_radius: f64) -> Self {
        RandomNearIncumbentSubOptimizer {
            incumbent,
            num_rounds: num_rounds.max(1),
            initial_radius: initial_radius.clamp(0.0, 1.0),
        }
    }
}

impl CandidateSubOptimizer for RandomNearIncumbentSubOptimizer {
    fn argmax(&self, internal_dim: usize, rng: &mut StdRng, acquisition: &dyn Fn(&[f64]) -> f64) -> (Vec<f64>, f64) {
        let base: Vec<f64> = if self.incumbent.len() == internal_dim {
            self.incumbent.clone()
        } else {
            (0..internal_dim).map(|_| rng.gen_range(0.0..1.0)).collect()
        };
        let mut best_point = base.clone();
        let mut best_score = acquisition(&base);
        let mut radius = self.initial_radius;
        for round in 0..self.num_rounds {
            let candidate: Vec<f64> = best_point
                .iter()
                .map(|&c| (c + rng.gen_range(-radius..=radius)).clamp(0.0, 1.0))
                .collect();
            let score = acquisition(&candidate);
            if score > best_score {
                best_score = score;
                best_point = candidate;
            }
            radius *= 1.0 - 1.0 / (self.num_rounds - round) as f64;
        }
        (best_point, best_score)
    }
}

struct GlowWorm {
    point: Vec<f64>,
    luciferin: f64,
    decision_radius: f64,
}

/// A small population of candidate points ("glow-worms"), each carrying a
/// luciferin value derived from acquisition score; every round each worm
/// moves toward a brighter neighbor within its own local-decision radius,
/// and that radius adapts to how many neighbors it currently has (spec
/// §4.4 item 3, "glow-worm swarm optimization").
pub struct GlowWormSwarmSubOptimizer {
    pub population_size: usize,
    pub num_rounds: usize,
    pub step_size: f64,
    pub desired_neighbors: usize,
    pub luciferin_decay: f64,
    pub luciferin_gain: f64,
}

impl GlowWormSwarmSubOptimizer {
    pub fn new(population_size: usize, num_rounds: usize) -> Self {
        GlowWormSwarmSubOptimizer {
            population_size: population_size.max(2),
            num_rounds: num_rounds.max(1),
            step_size: 0.05,
            desired_neighbors: 5,
            luciferin_decay: 0.4,
            luciferin_gain: 0.6,
        }
    }
}

impl CandidateSubOptimizer for GlowWormSwarmSubOptimizer {
    fn argmax(&self, internal_dim: usize, rng: &mut StdRng, acquisition: &dyn Fn(&[f64]) -> f64) -> (Vec<f64>, f64) {
        let mut worms: Vec<GlowWorm> = (0..self.population_size)
            .map(|_| GlowWorm {
                point: (0..internal_dim).map(|_| rng.gen_range(0.0..1.0)).collect(),
                luciferin: 0.0,
                decision_radius: 0.2,
            })
            .collect();

        for worm in &mut worms {
            worm.luciferin = acquisition(&worm.point);
        }

        for _ in 0..self.num_rounds {
            let snapshot: Vec<(Vec<f64>, f64, f64)> = worms.iter().map(|w| (w.point.clone(), w.luciferin, w.decision_radius)).collect();
            for (i, worm) in worms.iter_mut().enumerate() {
                let neighbors: Vec<&(Vec<f64>, f64, f64)> = snapshot
                    .iter()
                    .enumerate()
                    .filter(|(j, (point, luciferin, radius))| {
                        *j != i && *luciferin > snapshot[i].1 && euclidean_distance(point, &snapshot[i].0) < *radius
                    })
                    .map(|(_, entry)| entry)
                    .collect();

                if !neighbors.is_empty() {
                    let total_luciferin: f64 = neighbors.iter().map(|(_, l, _)| l - snapshot[i].1).sum();
                    let mut pick = rng.gen_range(0.0..total_luciferin.max(f64::EPSILON));
                    let mut chosen = neighbors[0];
                    for n in &neighbors {
                        pick -= n.1 - snapshot[i].1;
                        if pick <= 0.0 {
                            chosen = n;
                            break;
                        }
                    }
                    let direction: Vec<f64> = worm
                        .point
                        .iter()
                        .zip(chosen.0.iter())
                        .map(|(a, b)| b - a)
                        .collect();
                    let norm = direction.iter().map(|d| d * d).sum::<f64>().sqrt();
                    if norm > f64::EPSILON {
                        for (coord, d) in worm.point.iter_mut().zip(direction.iter()) {
                            *coord = (*coord + self.step_size * d / norm).clamp(0.0, 1.0);
                        }
                    }
                }

                worm.decision_radius = (worm.decision_radius + 0.05 * (self.desired_neighbors as f64 - neighbors.len() as f64)).clamp(0.01, 1.0);
                worm.luciferin = (1.0 - self.luciferin_decay) * worm.luciferin + self.luciferin_gain * acquisition(&worm.point);
            }
        }

        worms
            .into_iter()
            .map(|w| {
                let score = acquisition(&w.point);
                (w.point, score)
            })
            .fold((vec![0.5; internal_dim], f64::NEG_INFINITY), |best, candidate| if candidate.1 > best.1 { candidate } else { best })
    }
}

fn euclidean_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum::<f64>().sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn distance_from_origin(point: &[f64]) -> f64 {
        -point.iter().map(|v| v * v).sum::<f64>()
    }

    #[test]
    fn random_search_finds_a_point_near_the_optimum() {
        let opt = RandomSearchSubOptimizer::new(200);
        let mut rng = StdRng::seed_from_u64(1);
        let (point, score) = opt.argmax(3, &mut rng, &distance_from_origin);
        assert_eq!(point.len(), 3);
        assert!(score > f64::NEG_INFINITY);
    }

    #[test]
    fn near_incumbent_never_does_worse_than_its_start() {
        let incumbent = vec![0.9, 0.9];
        let start_score = distance_from_origin(&incumbent);
        let opt = RandomNearIncumbentSubOptimizer::new(incumbent, 20, 0.3);
        let mut rng = StdRng::seed_from_u64(2);
        let (_, score) = opt.argmax(2, &mut rng, &distance_from_origin);
        assert!(score >= start_score);
    }

    #[test]
    fn glow_worm_swarm_returns_a_point_in_bounds() {
        let opt = GlowWormSwarmSubOptimizer::new(10, 15);
        let mut rng = StdRng::seed_from_u64(3);
        let (point, score) = opt.argmax(2, &mut rng, &distance_from_origin);
        assert_eq!(point.len(), 2);
        assert!(point.iter().all(|v| (0.0..=1.0).contains(v)));
        assert!(score > f64::NEG_INFINITY);
    }
}
