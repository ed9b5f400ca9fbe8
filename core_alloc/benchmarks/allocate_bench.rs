use core_alloc::{
    allocate_seeded, AllocationConfig, Coefficients, Column, InlineParameterSource, ZoneTable,
};
use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use rand::{rngs::SmallRng, Rng, SeedableRng};

fn synthetic_table(zones: usize) -> ZoneTable {
    let mut rng = SmallRng::seed_from_u64(zones as u64);
    let mut numeric = |scale: f64| -> Vec<f64> { (0..zones).map(|_| rng.gen::<f64>() * scale).collect() };
    let acres = numeric(10.0);
    let dist = numeric(30.0);
    let units = numeric(200.0);
    let households: Vec<f64> = units.iter().map(|u| (u * 0.93).floor()).collect();
    ZoneTable::new(
        "zone_id",
        vec![
            Column::text("zone_id", (0..zones).map(|i| format!("z{i}"))),
            Column::text("group", (0..zones).map(|i| format!("g{}", i / 20))),
            Column::numeric("acres", acres),
            Column::numeric("dist", dist),
            Column::numeric("units", units),
            Column::numeric("households", households),
        ],
    )
    .expect("synthetic table is well formed")
}

fn config() -> AllocationConfig {
    AllocationConfig::from_json_str(
        r#"{
            "geo_id": "zone_id",
            "draws": 50,
            "developable": "acres > 0.5",
            "land_uses": {
                "homes": {
                    "name": "Homes",
                    "total": 500,
                    "store_field": "homes_new",
                    "vacancy": {
                        "target_rate": 0.05,
                        "total_units_field": "units",
                        "occupied_units_field": "households",
                        "group_field": "group",
                        "cap_field": "homes_cap"
                    }
                },
                "jobs": {
                    "name": "Jobs",
                    "total": 2000,
                    "store_field": "jobs_new",
                    "capacity": "ceil(acres * 3)"
                }
            }
        }"#,
    )
    .expect("bench config parses")
}

fn bench_allocate(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocate");
    let config = config();
    let parameters = InlineParameterSource::new()
        .with("homes", Coefficients::from_pairs([("dist", -0.1), ("acres", 0.2)]))
        .with("jobs", Coefficients::from_pairs([("dist", -0.3)]));

    for zones in [200usize, 1_000, 5_000] {
        let table = synthetic_table(zones);
        group.bench_with_input(BenchmarkId::new("zones", zones), &table, |b, table| {
            b.iter_batched(
                || table.clone(),
                |mut table| {
                    allocate_seeded(&mut table, &config, &parameters).expect("allocation completes")
                },
                BatchSize::LargeInput,
            )
        });
    }

    group.finish();
}

criterion_group!(allocate_benches, bench_allocate);
criterion_main!(allocate_benches);
