//! Group-level vacancy caps.
//!
//! For a land use with a vacancy block, zones are aggregated by the group
//! field and each group receives a cap on additional units that keeps its
//! occupancy at the target rate. Sparse groups (total units below the 25th
//! percentile across groups) are lifted to that percentile, the sign is
//! applied, and anything non-positive is raised to 1. The cap is broadcast to
//! every zone of the group and later multiplies the zone's selection weight.

use crate::allocation_config::VacancySpec;
use crate::zone_table::{TableError, ZoneTable};

pub const SPARSE_GROUP_QUANTILE: f64 = 0.25;

#[derive(Debug, Clone, PartialEq)]
pub struct GroupCap {
    pub key: String,
    pub total_units: f64,
    pub occupied_units: f64,
    pub cap: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VacancyCaps {
    pub threshold: f64,
    pub groups: Vec<GroupCap>,
}

impl VacancyCaps {
    pub fn cap_for(&self, key: &str) -> Option<f64> {
        self.groups
            .iter()
            .find(|group| group.key == key)
            .map(|group| group.cap)
    }
}

/// Units that can be added to a group before its vacancy drops below
/// `target_rate`, holding the occupied count fixed.
pub fn raw_group_cap(total_units: f64, occupied_units: f64, target_rate: f64) -> f64 {
    (-(occupied_units / (target_rate - 1.0))).floor() - total_units
}

/// Quantile with linear interpolation between closest ranks. Zero for an
/// empty input.
pub fn percentile(values: &[f64], quantile: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let position = quantile.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
}

/// Caps for each `(key, total_units, occupied_units)` group.
pub fn compute_group_caps(groups: &[(String, f64, f64)], spec: &VacancySpec) -> VacancyCaps {
    let totals: Vec<f64> = groups.iter().map(|(_, total, _)| *total).collect();
    let threshold = percentile(&totals, SPARSE_GROUP_QUANTILE);
    let sign = f64::from(spec.sign);

    let groups = groups
        .iter()
        .map(|(key, total, occupied)| {
            let mut cap = raw_group_cap(*total, *occupied, spec.target_rate);
            if *total < threshold {
                cap = threshold;
            }
            cap *= sign;
            if cap <= 0.0 || cap.is_nan() {
                cap = 1.0;
            }
            GroupCap {
                key: key.clone(),
                total_units: *total,
                occupied_units: *occupied,
                cap,
            }
        })
        .collect();

    VacancyCaps { threshold, groups }
}

/// Aggregates the table by group, computes caps and writes them to
/// `spec.cap_field` for every zone. Zones without a group value get cap 1.
pub fn apply_vacancy_caps(
    table: &mut ZoneTable,
    spec: &VacancySpec,
) -> Result<VacancyCaps, TableError> {
    let sums = table.sum_by_group(
        &spec.group_field,
        &[&spec.total_units_field, &spec.occupied_units_field],
    )?;
    let groups: Vec<(String, f64, f64)> = sums
        .into_iter()
        .map(|(key, values)| (key, values[0], values[1]))
        .collect();
    let caps = compute_group_caps(&groups, spec);

    let keys = table.group_keys(&spec.group_field)?;
    let broadcast: Vec<f64> = keys
        .iter()
        .map(|key| {
            key.as_deref()
                .and_then(|key| caps.cap_for(key))
                .unwrap_or(1.0)
        })
        .collect();
    table.set_numeric_column(&spec.cap_field, broadcast)?;

    tracing::debug!(
        target: "landuse_alloc::vacancy",
        cap_field = %spec.cap_field,
        groups = caps.groups.len(),
        threshold = caps.threshold,
        "vacancy.caps_applied"
    );
    Ok(caps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zone_table::Column;

    fn spec(sign: i8) -> VacancySpec {
        VacancySpec {
            target_rate: 0.05,
            total_units_field: "units".into(),
            occupied_units_field: "households".into(),
            group_field: "group".into(),
            cap_field: "cap".into(),
            sign,
        }
    }

    fn groups() -> Vec<(String, f64, f64)> {
        vec![
            ("empty".into(), 0.0, 0.0),
            ("full_small".into(), 3.0, 3.0),
            ("vacant_small".into(), 3.0, 2.0),
            ("half".into(), 20.0, 10.0),
            ("packed".into(), 100.0, 100.0),
        ]
    }

    #[test]
    fn raw_cap_solves_the_target_occupancy() {
        assert_eq!(raw_group_cap(100.0, 100.0, 0.05), 5.0);
        assert_eq!(raw_group_cap(20.0, 10.0, 0.05), -10.0);
        assert_eq!(raw_group_cap(0.0, 0.0, 0.05), 0.0);
        assert_eq!(raw_group_cap(10.0, 9.0, 0.0), -1.0);
    }

    #[test]
    fn percentile_interpolates_linearly() {
        assert_eq!(percentile(&[0.0, 3.0, 3.0, 20.0, 100.0], 0.25), 3.0);
        assert_eq!(percentile(&[1.0, 2.0, 3.0, 4.0], 0.25), 1.75);
        assert_eq!(percentile(&[7.0], 0.25), 7.0);
        assert_eq!(percentile(&[], 0.25), 0.0);
    }

    #[test]
    fn sparse_groups_are_lifted_to_the_threshold() {
        let caps = compute_group_caps(&groups(), &spec(1));
        assert_eq!(caps.threshold, 3.0);
        assert_eq!(caps.cap_for("empty"), Some(3.0));
        assert_eq!(caps.cap_for("full_small"), Some(1.0));
        assert_eq!(caps.cap_for("vacant_small"), Some(1.0));
        assert_eq!(caps.cap_for("half"), Some(1.0));
        assert_eq!(caps.cap_for("packed"), Some(5.0));
    }

    #[test]
    fn negative_sign_flips_before_clamping() {
        let caps = compute_group_caps(&groups(), &spec(-1));
        assert_eq!(caps.cap_for("half"), Some(10.0));
        for key in ["empty", "full_small", "vacant_small", "packed"] {
            assert_eq!(caps.cap_for(key), Some(1.0), "group {key}");
        }

        let shrinking = vec![
            ("a".to_string(), 50.0, 10.0),
            ("b".to_string(), 50.0, 10.0),
            ("c".to_string(), 60.0, 10.0),
        ];
        let caps = compute_group_caps(&shrinking, &spec(-1));
        assert_eq!(caps.threshold, 50.0);
        assert_eq!(caps.cap_for("a"), Some(40.0));
        assert_eq!(caps.cap_for("c"), Some(50.0));
    }

    #[test]
    fn caps_are_broadcast_to_every_zone_in_the_group() {
        let mut table = ZoneTable::new(
            "id",
            vec![
                Column::text("id", ["z1", "z2", "z3", "z4", "z5"]),
                Column::text("group", ["g1", "g1", "g2", "", "g3"]),
                Column::numeric("units", vec![60.0, 40.0, 0.0, 5.0, 8.0]),
                Column::numeric("households", vec![60.0, 40.0, 0.0, 5.0, f64::NAN]),
            ],
        )
        .unwrap();

        let caps = apply_vacancy_caps(&mut table, &spec(1)).unwrap();
        // group totals 100, 0 and 8; the ungrouped zone is left out
        assert_eq!(caps.threshold, 4.0);
        assert_eq!(table.numeric("cap").unwrap(), &[5.0, 5.0, 4.0, 1.0, 1.0]);
    }
}
