//! Stochastic land-use allocation engine.
//!
//! Distributes regional control totals (dwelling units, jobs, ...) across
//! zones by repeated discrete choice: sample candidate zones, score them with
//! a linear utility, weight by vacancy caps, draw one, place units. Runs are
//! reproducible for a fixed seed and input table via [`allocate_seeded`].

pub mod allocation_config;
mod capacity;
pub mod coefficients;
mod engine;
pub mod hashing;
mod model;
mod progress;
mod queue;
pub mod sampler;
mod update;
mod utility;
pub mod vacancy;
pub mod zone_table;

pub use allocation_config::{
    config_path_from_env, load_allocation_config, load_allocation_config_from_env,
    AllocationConfig, Capacity, ConfigError, Direction, LandUseSpec, SelectionPolicy,
    ShortfallPolicy, VacancySpec, CONFIG_PATH_ENV,
};
pub use capacity::{clamp_amount, CapacityResolver};
pub use coefficients::{
    CoefficientError, Coefficients, FileParameterSource, InlineParameterSource, ParameterSource,
};
pub use engine::{allocate, allocate_seeded, AllocationError, AllocationReport, LandUseOutcome};
pub use hashing::{table_digest, TableDigest};
pub use model::AllocationModel;
pub use progress::ProgressTracker;
pub use queue::{AllocationQueue, QueueEntry, QueueState};
pub use sampler::{weighted_choice, ChoiceSampler, Draw, InsufficientCandidates};
pub use update::UpdateBlock;
pub use utility::UtilityModel;
pub use vacancy::{apply_vacancy_caps, VacancyCaps};
pub use zone_table::{Column, ColumnData, TableError, ZoneTable};
