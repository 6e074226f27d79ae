//! quarry CLI: explain, cost and run plan files.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use quarry_core::prelude::{EngineConfig, TrackerNodeDesc};
use quarry_cost::{enumerate_configurations, CostEstimator, FailureModel, MaterializedPlan};
use quarry_exec::{LocalCluster, MasterCoordinator, RemoteCoordinator, TrackerNode};
use quarry_planner::{
    apply_split_points, chain_steps, combine_joins, estimate_operators, main_chain,
    parse_yaml_plan, split_points, CodeGenerator, ParsedPlan, PlanConfig, TrackerPlan,
};

const DEFAULT_MTBF_SECS: f64 = 3_600.0;
const DEFAULT_RETRIES: u32 = 1;

#[derive(Parser)]
#[command(name = "quarry")]
#[command(about = "Split SQL operator DAGs into tracker plans, schedule and run them", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Engine settings that override the environment and the plan file.
#[derive(Args, Debug, Clone, Default)]
struct EngineArgs {
    /// Scheduling policy: simple or wishlist
    #[arg(long)]
    policy: Option<String>,

    /// Slots each unit occupies
    #[arg(long)]
    slots_per_unit: Option<usize>,

    /// Mean time to recovery, seconds
    #[arg(long)]
    mttr_secs: Option<f64>,
}

/// Failure assumptions for the cost model.
#[derive(Args, Debug, Clone, Default)]
struct FailureArgs {
    /// Cluster mean time between failures, seconds
    #[arg(long)]
    mtbf_secs: Option<f64>,

    /// Retries granted to every level
    #[arg(long)]
    retries: Option<u32>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show split points, combined joins and the generated tracker plan
    Explain {
        /// Path to the plan YAML file
        #[arg(short, long)]
        plan: PathBuf,

        /// Also print the operator DAG in DOT
        #[arg(long)]
        dot: bool,
    },

    /// Rank materialization configurations of every root's main chain
    Cost {
        #[arg(short, long)]
        plan: PathBuf,

        /// How many configurations to print per root
        #[arg(long, default_value_t = 5)]
        top: usize,

        #[command(flatten)]
        failure: FailureArgs,

        #[command(flatten)]
        engine: EngineArgs,
    },

    /// Run a plan on an in-process cluster and print its run manifest
    Run {
        #[arg(short, long)]
        plan: PathBuf,

        /// Number of simulated compute nodes
        #[arg(long, default_value_t = 3)]
        nodes: usize,

        /// Slots per compute node (defaults to QUARRY_COMPUTE_SLOTS)
        #[arg(long)]
        slots: Option<usize>,

        /// Materialize the operators the cost model recommends before splitting
        #[arg(long)]
        materialize: bool,

        #[command(flatten)]
        failure: FailureArgs,

        #[command(flatten)]
        engine: EngineArgs,
    },
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    let outcome = match cli.command {
        Commands::Explain { plan, dot } => explain_plan(&plan, dot),
        Commands::Cost {
            plan,
            top,
            failure,
            engine,
        } => cost_plan(&plan, top, &failure, &engine),
        Commands::Run {
            plan,
            nodes,
            slots,
            materialize,
            failure,
            engine,
        } => run_plan(&plan, nodes, slots, materialize, &failure, &engine),
    };
    if let Err(e) = outcome {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("QUARRY_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Defaults < environment < plan file < command line.
fn resolve_config(doc: &PlanConfig, args: &EngineArgs) -> quarry_core::error::Result<EngineConfig> {
    let mut cfg = EngineConfig::from_env();
    doc.apply_to(&mut cfg);
    apply_engine_args(&mut cfg, args);
    cfg.validate()?;
    Ok(cfg)
}

fn apply_engine_args(cfg: &mut EngineConfig, args: &EngineArgs) {
    if let Some(p) = &args.policy {
        cfg.scheduling_policy = p.clone();
    }
    if let Some(n) = args.slots_per_unit {
        cfg.slots_per_unit = n;
    }
    if let Some(m) = args.mttr_secs {
        cfg.mttr_secs = m;
    }
}

fn failure_model(doc: &PlanConfig, args: &FailureArgs) -> quarry_core::error::Result<FailureModel> {
    FailureModel::new(
        args.mtbf_secs.or(doc.mtbf_secs).unwrap_or(DEFAULT_MTBF_SECS),
        args.retries.or(doc.retries).unwrap_or(DEFAULT_RETRIES),
    )
}

fn load(path: &Path) -> Result<(ParsedPlan, usize), Box<dyn std::error::Error>> {
    let yaml = fs::read_to_string(path)?;
    let mut parsed = parse_yaml_plan(&yaml)?;
    let combined = combine_joins(&mut parsed.plan)?;
    Ok((parsed, combined))
}

/// Rank every configuration of each root's main chain, one entry per root.
fn rank_roots(
    parsed: &ParsedPlan,
    estimator: &CostEstimator,
    model: &FailureModel,
) -> quarry_core::error::Result<Vec<(String, Vec<MaterializedPlan>)>> {
    let estimates = estimate_operators(&parsed.plan, &parsed.hints)?;
    let mut out = Vec::new();
    for root in parsed.plan.roots() {
        let chain = main_chain(&parsed.plan, root, &estimates)?;
        let steps = chain_steps(&chain, &estimates)?;
        let ranked = estimator.rank(enumerate_configurations(&steps, model)?)?;
        out.push((root.to_string(), ranked));
    }
    Ok(out)
}

fn print_tracker_plan(plan: &TrackerPlan) {
    println!("Tracker Plan {} ({} units)", plan.id(), plan.len());
    for unit in plan.units() {
        let sources: Vec<String> = plan.sources_of(&unit.id).map(|s| s.to_string()).collect();
        println!(
            "  unit {} -> {} (root op {}, {} operators)",
            unit.id,
            unit.output.name,
            unit.root_op,
            unit.operators.len()
        );
        if !sources.is_empty() {
            println!("    sources: {}", sources.join(", "));
        }
        println!("    sql: {}", unit.sql);
    }
}

fn explain_plan(path: &Path, dot: bool) -> Result<(), Box<dyn std::error::Error>> {
    let (parsed, combined) = load(path)?;
    let points = split_points(&parsed.plan)?;
    let tracker = CodeGenerator::new(&parsed.catalog).generate(&parsed.plan)?;

    println!("Plan {} ({} operators)", parsed.plan.id(), parsed.plan.len());
    println!("  Joins combined: {}", combined);
    let points: Vec<String> = points.iter().map(|p| p.to_string()).collect();
    println!("  Split points: {}", points.join(", "));
    println!();
    print_tracker_plan(&tracker);
    if dot {
        println!();
        println!("{}", parsed.plan.trace());
    }
    Ok(())
}

fn cost_plan(
    path: &Path,
    top: usize,
    failure: &FailureArgs,
    engine: &EngineArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let (parsed, _) = load(path)?;
    let cfg = resolve_config(&parsed.config, engine)?;
    let model = failure_model(&parsed.config, failure)?;
    let estimator = CostEstimator::new(cfg.mttr_secs)?;

    println!(
        "MTBF {}s, {} retries, MTTR {}s",
        model.mtbf_secs, model.retries, cfg.mttr_secs
    );
    for (root, ranked) in rank_roots(&parsed, &estimator, &model)? {
        println!();
        println!("Root {} ({} configurations)", root, ranked.len());
        for (i, config) in ranked.iter().take(top).enumerate() {
            let cuts: Vec<String> = config
                .levels
                .iter()
                .filter_map(|l| l.terminal().map(|t| t.to_string()))
                .collect();
            println!(
                "  {}. {:.3}s  materialize [{}]",
                i + 1,
                config.runtime,
                cuts.join(", ")
            );
        }
    }
    Ok(())
}

fn run_plan(
    path: &Path,
    nodes: usize,
    slots: Option<usize>,
    materialize: bool,
    failure: &FailureArgs,
    engine: &EngineArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let (mut parsed, _) = load(path)?;
    let cfg = resolve_config(&parsed.config, engine)?;

    if materialize {
        let model = failure_model(&parsed.config, failure)?;
        let estimator = CostEstimator::new(cfg.mttr_secs)?;
        let mut chosen = Vec::new();
        for (_, ranked) in rank_roots(&parsed, &estimator, &model)? {
            if let Some(best) = ranked.first() {
                chosen.extend(best.levels.iter().filter_map(|l| l.terminal().cloned()));
            }
        }
        let changed = apply_split_points(&mut parsed.plan, &chosen)?;
        tracing::info!(changed, "applied cost-model materialization");
    }

    let tracker_plan = CodeGenerator::new(&parsed.catalog).generate(&parsed.plan)?;
    let plan_id = tracker_plan.id().clone();

    let coordinator = Arc::new(MasterCoordinator::new());
    let cluster = Arc::new(LocalCluster::with_coordinator(
        cfg.coordinator_url.clone(),
        Arc::clone(&coordinator),
    ));
    let node_slots = slots.unwrap_or(cfg.compute_slots);
    for i in 1..=nodes {
        cluster.add_node(format!("node{i}:5500"), node_slots)?;
    }
    coordinator.register_tracker_node(TrackerNodeDesc::new(cfg.tracker_url(), 1))?;
    let tracker_url = coordinator.route_plan(&plan_id)?;

    let allocator = Arc::new(RemoteCoordinator::new(
        cluster.clone(),
        cfg.coordinator_url.clone(),
    ));
    let tracker = TrackerNode::new(&cfg, cluster.clone(), allocator)?;
    let manifest = tracker.execute_plan(tracker_plan)?;

    println!("{}", serde_json::to_string_pretty(&manifest)?);
    for desc in tracker.deployments(&plan_id)? {
        println!("  {} -> {} ({})", desc.unit, desc.node, desc.deployment);
    }

    tracker.clean_plan(&plan_id)?;
    coordinator.finish_plan(&tracker_url)?;
    Ok(())
}
