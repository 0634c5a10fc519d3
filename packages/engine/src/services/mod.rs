pub mod evaluation;
pub mod import;
pub mod mastery;
pub mod recommendation;
pub mod simulation;
pub mod training;

pub use evaluation::{
    compare_policies, holdout_metrics, summarize_with_dkt_p, HoldoutMetrics, PolicyComparison,
    PolicySummary,
};
pub use import::{import_batch, read_batch, ImportBatch, ImportSummary};
pub use mastery::{compute_theme_stats, target_difficulty, theme_stats, ThemeStat};
pub use recommendation::{recommend, Policy, ReasonType, RecommendationItem, Recommendations};
pub use simulation::{simulate_session, SimulationReport};
pub use training::{train, TrainingSummary};
