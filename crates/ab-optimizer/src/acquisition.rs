use crate::forest::Prediction;
use crate::pareto::ParetoFrontier;
use ab_core::ScoreMap;

/// Upper confidence bound on improvement over the best score seen so far
/// (spec §4.4 item 3): rewards both a low predicted mean and high
/// predicted uncertainty, scaled by `alpha`. Internal scores always
/// minimize, so a lower acquisition value is better; the sign is flipped
/// here so that callers always maximize.
pub fn upper_confidence_bound_on_improvement(prediction: &Prediction, best_internal_score: f64, alpha: f64) -> f64 {
    let std_dev = prediction.variance.max(0.0).sqrt();
    let improvement = best_internal_score - prediction.mean;
    improvement + alpha * std_dev
}

/// Probability that a point dominates (or is non-dominated against) the
/// current Pareto frontier under a simple Monte-Carlo-free approximation:
/// a point whose predicted mean weakly dominates every retained row scores
/// 1.0, a point dominated by every retained row scores 0.0, and a mixed
/// case is scored by the fraction of retained rows it is not dominated by,
/// widened by predicted uncertainty (spec §4.4 item 3,
/// `probability_of_pareto_improvement`).
pub fn probability_of_pareto_improvement(predicted: &ScoreMap, predicted_std: &ScoreMap, frontier: &ParetoFrontier) -> f64 {
    let (rows, _) = frontier.current();
    if rows.is_empty() {
        return 1.0;
    }
    let mut non_dominated_votes = 0usize;
    for row in &rows {
        let mut dominated_by_row = true;
        for (name, &row_value) in row {
            let Some(&mean) = predicted.get(name) else {
                dominated_by_row = false;
                break;
            };
            let slack = predicted_std.get(name).copied().unwrap_or(0.0);
            // internal convention always minimizes; a margin within one
            // predicted std deviation counts as "not worse".
            if mean - slack > row_value {
                dominated_by_row = false;
                break;
            }
        }
        if !dominated_by_row {
            non_dominated_votes += 1;
        }
    }
    non_dominated_votes as f64 / rows.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use ab_core::{ObjectiveDirection, ObjectiveMap, TunableGroups};

    fn prediction(mean: f64, variance: f64) -> Prediction {
        Prediction {
            mean,
            variance,
            sample_variance: variance,
            sample_size: 5,
            dof: 3,
        }
    }

    #[test]
    fn lower_mean_and_higher_uncertainty_both_raise_ucb() {
        let tight = prediction(0.0, 0.0);
        let wide = prediction(0.0, 4.0);
        assert!(upper_confidence_bound_on_improvement(&wide, 1.0, 1.0) > upper_confidence_bound_on_improvement(&tight, 1.0, 1.0));

        let low = prediction(-1.0, 0.0);
        let high = prediction(1.0, 0.0);
        assert!(upper_confidence_bound_on_improvement(&low, 1.0, 1.0) > upper_confidence_bound_on_improvement(&high, 1.0, 1.0));
    }

    #[test]
    fn empty_frontier_is_trivially_improvable() {
        let mut objectives = ObjectiveMap::new();
        objectives.insert("y".to_string(), ObjectiveDirection::Min);
        let frontier = ParetoFrontier::new(objectives);
        let predicted: ScoreMap = [("y".to_string(), 0.0)].into_iter().collect();
        let std: ScoreMap = [("y".to_string(), 0.1)].into_iter().collect();
        assert_eq!(probability_of_pareto_improvement(&predicted, &std, &frontier), 1.0);
    }

    #[test]
    fn point_strictly_worse_than_every_row_scores_zero() {
        let mut objectives = ObjectiveMap::new();
        objectives.insert("y".to_string(), ObjectiveDirection::Min);
        let mut frontier = ParetoFrontier::new(objectives);
        let score: ScoreMap = [("y".to_string(), 1.0)].into_iter().collect();
        frontier.update(vec![score], vec![TunableGroups::new()]);

        let predicted: ScoreMap = [("y".to_string(), 5.0)].into_iter().collect();
        let std: ScoreMap = [("y".to_string(), 0.0)].into_iter().collect();
        assert_eq!(probability_of_pareto_improvement(&predicted, &std, &frontier), 0.0);
    }
}
