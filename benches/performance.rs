use criterion::{black_box, criterion_group, criterion_main, Criterion};
use quarry::core::id::OperatorId;
use quarry::cost::{enumerate_configurations, ChainStep, CostEstimator, FailureModel};
use quarry::planner::{combine_joins, parse_yaml_plan, CodeGenerator};

/// A wide join over `tables` scans, each filtered before joining.
fn join_plan(tables: usize) -> String {
    let mut doc = String::from(
        "connections:\n  - { name: c1, url: \"mysql://db1:3306/bench\", node: \"db1:5500\" }\n\
         schemas:\n  - { name: bench, connection: c1 }\ntables:\n",
    );
    for t in 0..tables {
        doc.push_str(&format!(
            "  - {{ name: t{t}, schema: bench, connections: [c1], attributes: [{{name: k{t}, type: bigint}}, {{name: v{t}, type: int}}] }}\n"
        ));
    }
    doc.push_str("operators:\n");
    let mut next = 1;
    let mut inputs = Vec::new();
    for t in 0..tables {
        doc.push_str(&format!("  - {{ id: {next}, op: table_scan, table: t{t} }}\n"));
        doc.push_str(&format!(
            "  - {{ id: {}, op: selection, predicate: \"v{t} > 3\", children: [{next}], materialized: {} }}\n",
            next + 1,
            t % 2 == 0
        ));
        inputs.push(next + 1);
        next += 2;
    }
    let mut left = inputs[0];
    for (t, right) in inputs.iter().enumerate().skip(1) {
        doc.push_str(&format!(
            "  - {{ id: {next}, op: equi_join, left_key: k0, right_key: k{t}, children: [{left}, {right}] }}\n"
        ));
        left = next;
        next += 1;
    }
    doc
}

fn bench_codegen(c: &mut Criterion) {
    let src = join_plan(8);
    c.bench_function("codegen_join_8", |b| {
        b.iter(|| {
            let mut parsed = parse_yaml_plan(black_box(&src)).unwrap();
            combine_joins(&mut parsed.plan).unwrap();
            let plan = CodeGenerator::new(&parsed.catalog)
                .generate(&parsed.plan)
                .unwrap();
            black_box(plan.len())
        })
    });
}

fn bench_cost_ranking(c: &mut Criterion) {
    let steps: Vec<ChainStep> = (1..=12u64)
        .map(|i| ChainStep {
            op: OperatorId::from_parts(&[1, i]),
            runtime: 30.0 * i as f64,
            mat_runtime: 12.0,
        })
        .collect();
    let model = FailureModel::new(1800.0, 2).unwrap();
    let estimator = CostEstimator::new(30.0).unwrap();
    c.bench_function("rank_chain_12", |b| {
        b.iter(|| {
            let configs = enumerate_configurations(black_box(&steps), &model).unwrap();
            black_box(estimator.recommend(configs).unwrap().runtime)
        })
    });
}

criterion_group!(benches, bench_codegen, bench_cost_ranking);
criterion_main!(benches);
