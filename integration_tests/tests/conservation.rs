mod common;

use core_alloc::AllocationModel;

#[test]
fn control_totals_are_placed_exactly() {
    let mut model = common::load_model();
    let report = model.allocate().unwrap();
    let table = model.table();

    assert_eq!(common::column_sum(table, "jobs_new"), 40.0);
    assert_eq!(common::column_sum(table, "sfdu_new"), 25.0);
    assert_eq!(report.placed(), 65);
    assert_eq!(report.unallocated(), 0);
    assert!(report.land_uses.iter().all(|outcome| !outcome.skipped));
}

#[test]
fn unit_capacity_takes_one_step_per_unit() {
    let mut model = common::load_model();
    let report = model.allocate().unwrap();
    let sfdu = report.outcome("sfdu").unwrap();
    assert_eq!(sfdu.name, "Single family dwellings");
    assert_eq!(sfdu.store_field, "sfdu_new");
    // every jobs draw places at least 3 units, so it needs at most 14 steps
    assert!(report.steps >= 25 + 1);
    assert!(report.steps <= 25 + 14);
}

#[test]
fn placements_respect_filters_and_developability() {
    let table = common::allocated_table();
    let usable = table.numeric("usable_land").unwrap();
    let res = table.numeric("zoned_res").unwrap();
    let emp = table.numeric("zoned_emp").unwrap();

    for (row, &units) in table.numeric("sfdu_new").unwrap().iter().enumerate() {
        assert!(units >= 0.0 && units.fract() == 0.0);
        if units > 0.0 {
            assert_eq!(res[row], 1.0, "sfdu in {}", table.zone_id(row));
            assert_eq!(usable[row], 1.0, "sfdu in {}", table.zone_id(row));
        }
    }
    for (row, &jobs) in table.numeric("jobs_new").unwrap().iter().enumerate() {
        assert!(jobs >= 0.0 && jobs.fract() == 0.0);
        if jobs > 0.0 {
            assert_eq!(emp[row], 1.0, "jobs in {}", table.zone_id(row));
            assert_eq!(usable[row], 1.0, "jobs in {}", table.zone_id(row));
        }
    }

    for zone in ["Z07", "Z19"] {
        let row = table.row_of(zone).unwrap();
        assert_eq!(table.numeric("sfdu_new").unwrap()[row], 0.0);
    }
}

#[test]
fn input_columns_are_untouched() {
    let before = common::load_zones();
    let mut model = AllocationModel::new(common::load_config(), before.clone()).unwrap();
    model.allocate().unwrap();
    for field in ["TOT_DU", "TOT_HH", "acres", "dist_cbd", "jobs_existing"] {
        assert_eq!(before.numeric(field).unwrap(), model.table().numeric(field).unwrap());
    }
}
