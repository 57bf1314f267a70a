pub mod covariant_group;
pub mod errors;
pub mod objective;
pub mod status;
pub mod tunable;
pub mod tunable_groups;

pub use covariant_group::CovariantGroup;
pub use errors::*;
pub use objective::{to_external_scores, to_internal_scores, ObjectiveDirection, ObjectiveMap, ScoreMap};
pub use status::Status;
pub use tunable::{Cardinality, NumericTunableSpec, Tunable, TunableDistribution, TunableType, TunableValue};
pub use tunable_groups::TunableGroups;
