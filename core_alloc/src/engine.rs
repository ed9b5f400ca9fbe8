//! The Monte Carlo allocation loop.
//!
//! Each step draws a land use from the pool, samples candidate zones, weights
//! them by vacancy cap times exponentiated utility, draws one zone, resolves
//! how many units it takes and writes them to the land use's store field.
//! Steps run strictly one after another: every step reads the table as the
//! previous step left it.

use std::time::{Duration, Instant};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use thiserror::Error;

use crate::allocation_config::{AllocationConfig, ConfigError, LandUseSpec, ShortfallPolicy};
use crate::capacity::CapacityResolver;
use crate::coefficients::ParameterSource;
use crate::progress::ProgressTracker;
use crate::queue::AllocationQueue;
use crate::sampler::{weighted_choice, ChoiceSampler, InsufficientCandidates};
use crate::utility::UtilityModel;
use crate::vacancy::apply_vacancy_caps;
use crate::zone_table::{TableError, ZoneTable};

#[derive(Debug, Error)]
pub enum AllocationError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Table(#[from] TableError),
    #[error("land use '{land_use}' needs {requested} candidate zones but only {available} are eligible")]
    InsufficientCandidates {
        land_use: String,
        requested: usize,
        available: usize,
    },
    #[error("allocation stopped after {limit} iterations with {remaining} units unplaced")]
    IterationLimit { limit: u64, remaining: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LandUseOutcome {
    pub key: String,
    pub name: String,
    pub store_field: String,
    pub requested: u64,
    pub placed: u64,
    pub unallocated: u64,
    pub skipped: bool,
}

#[derive(Debug, Clone, Default)]
pub struct AllocationReport {
    pub steps: u64,
    pub zero_draws: u64,
    pub uniform_fallbacks: u64,
    pub land_uses: Vec<LandUseOutcome>,
    pub elapsed: Duration,
}

impl AllocationReport {
    pub fn placed(&self) -> u64 {
        self.land_uses.iter().map(|outcome| outcome.placed).sum()
    }

    pub fn unallocated(&self) -> u64 {
        self.land_uses.iter().map(|outcome| outcome.unallocated).sum()
    }

    pub fn outcome(&self, key: &str) -> Option<&LandUseOutcome> {
        self.land_uses.iter().find(|outcome| outcome.key == key)
    }
}

/// Everything the loop needs for one land use, bound to the table.
struct PreparedLandUse<'a> {
    key: &'a str,
    spec: &'a LandUseSpec,
    draws: usize,
    store_slot: usize,
    cap_slot: Option<usize>,
    sampler: ChoiceSampler,
    utility: UtilityModel,
    capacity: CapacityResolver,
}

fn expression_error<'a>(
    key: &'a str,
    role: &'static str,
) -> impl FnOnce(TableError) -> ConfigError + 'a {
    move |source| ConfigError::Expression {
        land_use: key.to_string(),
        role,
        source,
    }
}

fn shortfall_error(land_use: &str, short: InsufficientCandidates) -> AllocationError {
    AllocationError::InsufficientCandidates {
        land_use: land_use.to_string(),
        requested: short.requested,
        available: short.available,
    }
}

fn prepare<'a, P: ParameterSource + ?Sized>(
    table: &mut ZoneTable,
    config: &'a AllocationConfig,
    parameters: &P,
) -> Result<Vec<PreparedLandUse<'a>>, AllocationError> {
    // Store fields first so filters and capacities may reference any of them.
    let mut store_slots = Vec::with_capacity(config.land_uses.len());
    for (key, spec) in &config.land_uses {
        store_slots.push(table.fill_numeric_column(&spec.store_field, 0.0)?);
        tracing::info!(
            target: "landuse_alloc::engine",
            land_use = %key,
            name = %spec.name,
            total = spec.total,
            store_field = %spec.store_field,
            "land_use.queued"
        );
    }

    for (key, spec) in &config.land_uses {
        if let Some(vacancy) = &spec.vacancy {
            apply_vacancy_caps(table, vacancy).map_err(expression_error(key, "vacancy"))?;
        }
    }

    let mut prepared = Vec::with_capacity(config.land_uses.len());
    for ((key, spec), store_slot) in config.land_uses.iter().zip(store_slots) {
        let sampler = ChoiceSampler::bind(table, &spec.filter, &config.developable)
            .map_err(expression_error(key, "filter"))?;
        let capacity =
            CapacityResolver::bind(&spec.capacity, table).map_err(expression_error(key, "capacity"))?;
        let cap_slot = match &spec.vacancy {
            Some(vacancy) => Some(table.numeric_slot(&vacancy.cap_field)?),
            None => None,
        };
        let coefficients = if spec.total > 0 {
            parameters.load(key, spec)?
        } else {
            Default::default()
        };
        let utility = UtilityModel::bind(&coefficients, table, spec.direction);

        prepared.push(PreparedLandUse {
            key,
            spec,
            draws: config.draws_for(spec),
            store_slot,
            cap_slot,
            sampler,
            utility,
            capacity,
        });
    }
    Ok(prepared)
}

/// Runs the allocation with a ChaCha generator seeded from `config.seed`.
pub fn allocate_seeded<P: ParameterSource + ?Sized>(
    table: &mut ZoneTable,
    config: &AllocationConfig,
    parameters: &P,
) -> Result<AllocationReport, AllocationError> {
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    allocate(table, config, parameters, &mut rng)
}

/// Places every land use's control total into `table`.
///
/// Store fields are reset to zero first. On error the table is left partially
/// written and should be discarded.
pub fn allocate<P, R>(
    table: &mut ZoneTable,
    config: &AllocationConfig,
    parameters: &P,
    rng: &mut R,
) -> Result<AllocationReport, AllocationError>
where
    P: ParameterSource + ?Sized,
    R: Rng + ?Sized,
{
    let started = Instant::now();
    config.validate()?;
    let prepared = prepare(table, config, parameters)?;

    let mut queue = AllocationQueue::new(
        prepared.iter().map(|land_use| (land_use.key, land_use.spec.total)),
        config.selection,
    );
    let mut progress = ProgressTracker::new(queue.queue_len());
    let mut report = AllocationReport::default();

    tracing::info!(
        target: "landuse_alloc::engine",
        land_uses = prepared.len(),
        queue_len = queue.queue_len(),
        zones = table.len(),
        "allocation.started"
    );

    while let Some(index) = queue.select(rng) {
        if let Some(limit) = config.max_iterations {
            if report.steps >= limit {
                return Err(AllocationError::IterationLimit {
                    limit,
                    remaining: queue.remaining(),
                });
            }
        }
        report.steps += 1;

        let land_use = &prepared[index];
        let requested = land_use.draws;
        let candidates = match land_use.sampler.sample_candidates(rng, table, requested) {
            Ok(candidates) => candidates,
            Err(short) => match config.shortfall {
                ShortfallPolicy::SampleAvailable if short.available > 0 => land_use
                    .sampler
                    .sample_candidates(rng, table, short.available)
                    .map_err(|short| shortfall_error(land_use.key, short))?,
                ShortfallPolicy::SkipLandUse => {
                    tracing::warn!(
                        target: "landuse_alloc::engine",
                        land_use = %land_use.key,
                        requested,
                        available = short.available,
                        remaining = queue.entry(index).remaining,
                        "land_use.skipped=insufficient_candidates"
                    );
                    queue.retire(index);
                    continue;
                }
                _ => return Err(shortfall_error(land_use.key, short)),
            },
        };

        let mut weights = land_use.utility.exp_weights(table, &candidates);
        if let Some(cap_slot) = land_use.cap_slot {
            for (weight, &row) in weights.iter_mut().zip(&candidates) {
                *weight *= table.value_at(row, cap_slot);
            }
        }

        let Some(draw) = weighted_choice(rng, &candidates, &weights) else {
            return Err(shortfall_error(
                land_use.key,
                InsufficientCandidates {
                    requested,
                    available: 0,
                },
            ));
        };
        if draw.uniform_fallback {
            report.uniform_fallbacks += 1;
        }

        let row = draw.choice;
        let amount = land_use
            .capacity
            .resolve_amount(table, row, queue.entry(index).remaining);
        if amount == 0 {
            report.zero_draws += 1;
            tracing::trace!(
                target: "landuse_alloc::engine",
                land_use = %land_use.key,
                zone = %table.zone_id(row),
                "allocation.zero_amount"
            );
        } else {
            table.add_at(row, land_use.store_slot, amount as f64)?;
        }

        if queue.record(index, amount) {
            tracing::info!(
                target: "landuse_alloc::engine",
                land_use = %land_use.key,
                step = report.steps,
                "land_use.completed"
            );
        }
        progress.advance(amount);
    }

    report.land_uses = prepared
        .iter()
        .zip(queue.entries())
        .map(|(land_use, entry)| LandUseOutcome {
            key: land_use.key.to_string(),
            name: land_use.spec.name.clone(),
            store_field: land_use.spec.store_field.clone(),
            requested: entry.initial,
            placed: entry.placed(),
            unallocated: entry.remaining,
            skipped: entry.retired,
        })
        .collect();
    report.elapsed = started.elapsed();

    tracing::info!(
        target: "landuse_alloc::engine",
        steps = report.steps,
        placed = report.placed(),
        unallocated = report.unallocated(),
        zero_draws = report.zero_draws,
        uniform_fallbacks = report.uniform_fallbacks,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "allocation.finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocation_config::SelectionPolicy;
    use crate::coefficients::{Coefficients, InlineParameterSource};
    use crate::zone_table::Column;

    fn table() -> ZoneTable {
        let n = 12;
        ZoneTable::new(
            "zone_id",
            vec![
                Column::text("zone_id", (0..n).map(|i| format!("z{i:02}"))),
                Column::text("group", (0..n).map(|i| format!("g{}", i % 3))),
                Column::numeric("usable", (0..n).map(|i| if i == 11 { 0.0 } else { 1.0 }).collect()),
                Column::numeric("res", (0..n).map(|i| f64::from(i % 2 == 0)).collect()),
                Column::numeric("acres", (0..n).map(|i| 0.5 + i as f64 * 0.25).collect()),
                Column::numeric("units", (0..n).map(|i| (i * 3) as f64).collect()),
                Column::numeric("households", (0..n).map(|i| (i * 3) as f64).collect()),
            ],
        )
        .unwrap()
    }

    fn config(extra: &str) -> AllocationConfig {
        let json = format!(
            r#"{{
                "geo_id": "zone_id",
                "seed": 77,
                "draws": 3,
                "developable": "usable > 0",
                {extra}
                "land_uses": {{
                    "homes": {{
                        "name": "Homes",
                        "total": 10,
                        "store_field": "homes_new",
                        "filter": "res == 1",
                        "vacancy": {{
                            "target_rate": 0.05,
                            "total_units_field": "units",
                            "occupied_units_field": "households",
                            "group_field": "group",
                            "cap_field": "homes_cap"
                        }}
                    }},
                    "jobs": {{
                        "name": "Jobs",
                        "total": 25,
                        "store_field": "jobs_new",
                        "capacity": "acres * 2"
                    }}
                }}
            }}"#
        );
        AllocationConfig::from_json_str(&json).expect("test config parses")
    }

    fn parameters() -> InlineParameterSource {
        InlineParameterSource::new()
            .with("homes", Coefficients::from_pairs([("acres", 0.5)]))
            .with("jobs", Coefficients::from_pairs([("acres", -0.2), ("missing", 3.0)]))
    }

    #[test]
    fn totals_are_conserved_and_filters_respected() {
        let mut table = table();
        let report = allocate_seeded(&mut table, &config(""), &parameters()).unwrap();

        let homes = table.numeric("homes_new").unwrap();
        let jobs = table.numeric("jobs_new").unwrap();
        assert_eq!(homes.iter().sum::<f64>(), 10.0);
        assert_eq!(jobs.iter().sum::<f64>(), 25.0);
        assert!(homes.iter().chain(jobs).all(|value| *value >= 0.0));

        let res = table.numeric("res").unwrap();
        for (row, value) in homes.iter().enumerate() {
            if *value > 0.0 {
                assert_eq!(res[row], 1.0, "homes placed in non-residential zone {row}");
            }
        }
        assert_eq!(homes[11], 0.0);
        assert_eq!(jobs[11], 0.0);

        assert_eq!(report.placed(), 35);
        assert_eq!(report.unallocated(), 0);
        assert_eq!(report.outcome("homes").unwrap().placed, 10);
        assert!(table.has_column("homes_cap"));
    }

    #[test]
    fn unit_draws_terminate_within_queue_length() {
        let mut table = table();
        let json = r#"{
            "geo_id": "zone_id",
            "draws": 2,
            "land_uses": {
                "a": { "name": "A", "total": 10, "store_field": "a_new" },
                "b": { "name": "B", "total": 5, "store_field": "b_new" }
            }
        }"#;
        let config = AllocationConfig::from_json_str(json).unwrap();
        let parameters = InlineParameterSource::new()
            .with("a", Coefficients::default())
            .with("b", Coefficients::default());
        let report = allocate_seeded(&mut table, &config, &parameters).unwrap();
        assert_eq!(report.steps, 15);
        assert_eq!(report.zero_draws, 0);
    }

    #[test]
    fn same_seed_same_table() {
        let run = || {
            let mut table = table();
            allocate_seeded(&mut table, &config(""), &parameters()).unwrap();
            table.to_csv_bytes().unwrap()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn store_fields_are_reset_before_allocating() {
        let mut table = table();
        table.fill_numeric_column("homes_new", 99.0).unwrap();
        allocate_seeded(&mut table, &config(""), &parameters()).unwrap();
        assert_eq!(table.numeric("homes_new").unwrap().iter().sum::<f64>(), 10.0);
    }

    #[test]
    fn shortfall_policies() {
        let json = |policy: &str| {
            format!(
                r#"{{
                    "geo_id": "zone_id",
                    "draws": 8,
                    "shortfall": "{policy}",
                    "developable": "usable > 0",
                    "land_uses": {{
                        "homes": {{ "name": "Homes", "total": 4, "store_field": "homes_new", "filter": "res == 1" }}
                    }}
                }}"#
            )
        };
        let parameters = InlineParameterSource::new().with("homes", Coefficients::default());

        let abort = AllocationConfig::from_json_str(&json("abort")).unwrap();
        let err = allocate_seeded(&mut table(), &abort, &parameters).unwrap_err();
        assert!(matches!(
            err,
            AllocationError::InsufficientCandidates { requested: 8, available: 6, .. }
        ));

        let sample = AllocationConfig::from_json_str(&json("sample_available")).unwrap();
        let mut sampled = table();
        let report = allocate_seeded(&mut sampled, &sample, &parameters).unwrap();
        assert_eq!(report.placed(), 4);

        let skip = AllocationConfig::from_json_str(&json("skip_land_use")).unwrap();
        let mut skipped = table();
        let report = allocate_seeded(&mut skipped, &skip, &parameters).unwrap();
        let outcome = report.outcome("homes").unwrap();
        assert!(outcome.skipped);
        assert_eq!(outcome.unallocated, 4);
        assert_eq!(skipped.numeric("homes_new").unwrap().iter().sum::<f64>(), 0.0);
    }

    #[test]
    fn zero_capacity_zones_hit_the_iteration_cap() {
        let json = r#"{
            "geo_id": "zone_id",
            "draws": 2,
            "max_iterations": 50,
            "land_uses": {
                "stuck": { "name": "Stuck", "total": 3, "store_field": "stuck_new", "capacity": "acres * 0" }
            }
        }"#;
        let config = AllocationConfig::from_json_str(json).unwrap();
        let parameters = InlineParameterSource::new().with("stuck", Coefficients::default());
        let err = allocate_seeded(&mut table(), &config, &parameters).unwrap_err();
        assert!(matches!(
            err,
            AllocationError::IterationLimit { limit: 50, remaining: 3 }
        ));
    }

    #[test]
    fn unknown_filter_column_is_a_config_error() {
        let json = r#"{
            "geo_id": "zone_id",
            "land_uses": {
                "x": { "name": "X", "total": 1, "store_field": "x_new", "filter": "zoning == 2" }
            }
        }"#;
        let config = AllocationConfig::from_json_str(json).unwrap();
        let parameters = InlineParameterSource::new().with("x", Coefficients::default());
        let err = allocate_seeded(&mut table(), &config, &parameters).unwrap_err();
        assert!(matches!(
            err,
            AllocationError::Config(ConfigError::Expression { role: "filter", .. })
        ));
    }

    #[test]
    fn cap_column_cannot_seed_another_store_field() {
        let json = r#"{
            "geo_id": "zone_id",
            "draws": 2,
            "land_uses": {
                "a": {
                    "name": "A",
                    "total": 2,
                    "store_field": "a_new",
                    "vacancy": {
                        "target_rate": 0.05,
                        "total_units_field": "units",
                        "occupied_units_field": "households",
                        "group_field": "group",
                        "cap_field": "b_new"
                    }
                },
                "b": { "name": "B", "total": 4, "store_field": "b_new" }
            }
        }"#;
        assert!(matches!(
            AllocationConfig::from_json_str(json),
            Err(ConfigError::InvalidLandUse { ref land_use, .. }) if land_use == "a"
        ));

        let renamed = json.replace("\"cap_field\": \"b_new\"", "\"cap_field\": \"a_cap\"");
        let config = AllocationConfig::from_json_str(&renamed).unwrap();
        let parameters = InlineParameterSource::new()
            .with("a", Coefficients::default())
            .with("b", Coefficients::default());
        let mut table = table();
        allocate_seeded(&mut table, &config, &parameters).unwrap();
        assert_eq!(table.numeric("b_new").unwrap().iter().sum::<f64>(), 4.0);
        assert_eq!(table.numeric("a_new").unwrap().iter().sum::<f64>(), 2.0);
    }

    #[test]
    fn weighted_selection_policy_still_conserves() {
        let mut config = config("");
        config.selection = SelectionPolicy::WeightedByRemaining;
        let mut table = table();
        let report = allocate_seeded(&mut table, &config, &parameters()).unwrap();
        assert_eq!(report.placed(), 35);
    }
}
