//! Headless simulation runner.
//!
//! Loads a world from the given snapshot file, or creates a fresh one when
//! the file does not exist yet. Runs the tick loop, re-saving on a fixed
//! interval; deleting the snapshot file stops the run.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use fishbowl_brain::NeuralPolicy;
use fishbowl_core::{World, WorldConfig};
use fishbowl_storage::{load_world, save_world, JsonPolicyCodec};

/// Fish per million square units in a freshly created world.
const DEFAULT_FISH_DENSITY: f64 = 40.0;
/// Food per million square units in a freshly created world.
const DEFAULT_FOOD_DENSITY: f64 = 500.0;

#[derive(Debug, Parser)]
#[command(name = "fishbowl", about = "Evolving fish-tank simulation")]
struct Args {
    /// Snapshot file to resume from and keep saving to.
    save: PathBuf,

    /// World width, used only when creating a fresh world.
    #[arg(long, default_value_t = 1470.0)]
    width: f64,

    /// World height, used only when creating a fresh world.
    #[arg(long, default_value_t = 850.0)]
    height: f64,

    /// Fish per million square units when creating a fresh world.
    #[arg(long, default_value_t = DEFAULT_FISH_DENSITY)]
    fish_density: f64,

    /// Food per million square units when creating a fresh world.
    #[arg(long, default_value_t = DEFAULT_FOOD_DENSITY)]
    food_density: f64,

    /// Fish population floor.
    #[arg(long, default_value_t = 10)]
    min_population: usize,

    /// World RNG seed, used only when creating a fresh world.
    #[arg(long, default_value_t = 0xF15B)]
    seed: u64,

    /// Ticks between snapshot saves.
    #[arg(long, default_value_t = 1000)]
    save_interval: u64,

    /// Stop after this many ticks.
    #[arg(long, default_value_t = 1_000_000)]
    max_ticks: u64,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let codec = JsonPolicyCodec::<NeuralPolicy>::new();

    let mut world = if args.save.exists() {
        let mut world = load_world(&args.save, &codec)
            .with_context(|| format!("loading snapshot {}", args.save.display()))?;
        world.install_policy_spawner(NeuralPolicy::spawner());
        info!(
            time = world.time(),
            fish = world.fish_count(),
            food = world.food_count(),
            "resumed world from snapshot"
        );
        world
    } else {
        let mut world = World::with_config(WorldConfig {
            width: args.width,
            height: args.height,
            min_population: args.min_population,
            seed: args.seed,
        })
        .context("creating world")?;
        world.install_policy_spawner(NeuralPolicy::spawner());
        world
            .initialize(args.fish_density, args.food_density)
            .context("seeding initial population")?;
        save_world(&world, &codec, &args.save)
            .with_context(|| format!("writing initial snapshot {}", args.save.display()))?;
        info!(
            width = args.width,
            height = args.height,
            fish = world.fish_count(),
            food = world.food_count(),
            "created fresh world"
        );
        world
    };

    while world.time() < args.max_ticks {
        let report = world.tick().context("advancing simulation")?;
        if report.time % args.save_interval == 0 {
            if !args.save.exists() {
                warn!(
                    path = %args.save.display(),
                    "snapshot file removed, stopping"
                );
                return Ok(());
            }
            save_world(&world, &codec, &args.save)
                .with_context(|| format!("saving snapshot {}", args.save.display()))?;
            info!(
                time = report.time,
                fish = report.fish,
                food = report.food,
                reserve = world.energy_reserve(),
                mutations = world.mutation_count(),
                generation = world.longest_generation(),
                "saved snapshot"
            );
        }
    }
    info!(time = world.time(), "tick ceiling reached, stopping");
    Ok(())
}
