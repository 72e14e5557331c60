mod session;
mod worldgen;

use clap::{Parser, Subcommand};
use mapstream_common::{DimensionId, SubmapPos, TilePos};
use mapstream_kernel::{
    FieldEntry, FieldTypeId, Item, Submap, TerrainId, Vehicle, VehicleBattery, catch_up_submap,
};
use mapstream_persist::{ChunkStoreRegistry, PersistConfig, QuadFileStore};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use crate::session::Session;

#[derive(Parser)]
#[command(name = "mapstream-cli", about = "Drive and inspect the submap streaming layer")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Persistence config (JSON); defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the save root from the config
    #[arg(long)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print version, save root and stored quad counts
    Info,
    /// Walk a viewport east across a seeded world, then save
    Walk {
        /// Number of turns to walk, one submap per turn
        #[arg(short, long, default_value = "20")]
        steps: i32,
        /// Viewport radius in submaps
        #[arg(short, long, default_value = "3")]
        radius: i32,
        /// World seed
        #[arg(long, default_value = "42")]
        seed: u64,
        /// Keep everything resident on the final save
        #[arg(long)]
        keep: bool,
    },
    /// Catch a sample submap up by N turns and compare with per-turn decay
    Catchup {
        /// Elapsed turns
        #[arg(short, long, default_value = "500")]
        turns: i64,
        /// RNG seed for the per-turn comparison
        #[arg(long, default_value = "42")]
        seed: u64,
    },
    /// Load one submap from the save and summarize it
    Inspect {
        #[arg(allow_negative_numbers = true)]
        x: i32,
        #[arg(allow_negative_numbers = true)]
        y: i32,
        #[arg(allow_negative_numbers = true, default_value = "0")]
        z: i32,
        /// Dimension name; empty for the primary dimension
        #[arg(long, default_value = "")]
        dim: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    let mut config = match &cli.config {
        Some(path) => PersistConfig::load(path)?,
        None => PersistConfig::default(),
    };
    if let Some(root) = cli.root {
        config.root = root;
    }

    match cli.command {
        Commands::Info => info(&config)?,
        Commands::Walk {
            steps,
            radius,
            seed,
            keep,
        } => walk(&config, steps, radius, seed, keep)?,
        Commands::Catchup { turns, seed } => catchup(turns, seed),
        Commands::Inspect { x, y, z, dim } => {
            inspect(&config, &DimensionId::new(dim), SubmapPos::new(x, y, z))?
        }
    }

    Ok(())
}

fn info(config: &PersistConfig) -> anyhow::Result<()> {
    let store = QuadFileStore::open(config)?;
    let meta = store.meta();
    println!("mapstream-cli v{}", env!("CARGO_PKG_VERSION"));
    println!("save root: {}", store.root().display());
    println!(
        "schema: quad v{}, submap v{}",
        meta.quad_schema_version, meta.submap_format_version
    );
    println!(
        "compression level {}, parallel save {}, checksums {}",
        config.compression_level, config.parallel_save, config.verify_checksums
    );
    println!(
        "primary dimension: {} quad files",
        store.quad_file_count(&DimensionId::primary())?
    );
    Ok(())
}

fn walk(config: &PersistConfig, steps: i32, radius: i32, seed: u64, keep: bool) -> anyhow::Result<()> {
    println!("Walking {steps} turns, radius {radius}, seed {seed}");
    let mut session = Session::open(config, seed, radius)?;
    session.wire_row(-radius, steps / 2 + radius);

    for x in 0..=steps {
        let r = session.step(SubmapPos::new(x, 0, 0));
        println!(
            "turn {:>3}: +{} ({} generated) -{} quads evicted {} | caught up {} (decay {}, items {}, vehicle {} J) | keepalive +{} -{} | grids {} energy {} J starved {} transforms {} | resident {}",
            r.turn,
            r.tracker.loaded,
            r.tracker.generated,
            r.tracker.unloaded,
            r.tracker.evicted_quads,
            r.caught_up,
            r.catch_up.fields.decrements,
            r.catch_up.items_advanced,
            r.catch_up.vehicle_energy,
            r.keepalive.requested,
            r.keepalive.released,
            r.grids.grids,
            r.grids.energy_applied,
            r.grids.starved_grids,
            r.grids.transforms_applied,
            r.resident,
        );
        for action in &r.fired_actions {
            println!("    action fired: {action}");
        }
    }

    let stats = session.tracker.stats();
    println!(
        "tracker: {} requests, {} desired, last update {:?}",
        stats.requests, stats.desired, stats.update_time
    );
    println!(
        "keepalive: {} burning, {} held requests",
        session.keepalive.borrow().burning().count(),
        session.keepalive.borrow().held_requests()
    );

    let reports = session.save(!keep);
    tracing::info!(turn = session.turn(), dimensions = reports.len(), evict = !keep, "final save done");
    for (dim, report) in &reports {
        println!(
            "saved {dim} at turn {}: {} written, {} uniform skipped, {} failed, {} evicted",
            session.turn(),
            report.quads_written,
            report.quads_skipped_uniform,
            report.quads_failed,
            report.evicted.len()
        );
    }
    Ok(())
}

fn catchup(turns: i64, seed: u64) {
    let mut sample = Submap::uniform(TerrainId(1));
    let hearth = TilePos::new(4, 4).unwrap_or_default();
    sample.add_field(hearth, FieldTypeId::fire(), FieldEntry::new(3, 100));
    sample.add_field(hearth, FieldTypeId::new("fd_smoke"), FieldEntry::new(2, 25));
    sample.add_item(hearth, Item::with_countdown("kitchen_timer", 300, "beep"));
    let mut van = Vehicle::new("van");
    van.batteries.push(VehicleBattery::new(100_000, 20_000));
    van.generation_w = 50;
    van.consumption_w = 20;
    sample.add_vehicle(van);

    let mut batched = sample.clone();
    let report = catch_up_submap(&mut batched, turns);
    println!("Batched catch-up over {turns} turns: {report:?}");

    let mut rng = StdRng::seed_from_u64(seed);
    let mut per_turn = sample;
    for _ in 0..turns.max(0) {
        per_turn.update_fields(|_, entry| {
            entry.decay_turn(&mut rng);
        });
    }

    println!("{:<10} {:>8} {:>8}", "field", "batched", "per-turn");
    for kind in [FieldTypeId::fire(), FieldTypeId::new("fd_smoke")] {
        let intensity = |sm: &Submap| {
            sm.field_at(hearth)
                .and_then(|m| m.get(&kind))
                .map_or(0, |e| e.intensity)
        };
        println!(
            "{:<10} {:>8} {:>8}",
            kind.0,
            intensity(&batched),
            intensity(&per_turn)
        );
    }
    println!(
        "van battery: {} J, timer left: {:?}",
        batched.vehicles().first().map_or(0, Vehicle::battery_stored),
        batched.items_at(hearth).first().and_then(|i| i.countdown)
    );
}

fn inspect(config: &PersistConfig, dim: &DimensionId, pos: SubmapPos) -> anyhow::Result<()> {
    let mut registry = ChunkStoreRegistry::open(config)?;
    let Some(submap) = registry.get(dim).lookup(pos) else {
        println!("{pos} in {dim}: not stored (would be generated)");
        return Ok(());
    };
    println!("{pos} in {dim} (quad {})", pos.area());
    println!("  uniform: {}", submap.is_uniform());
    println!("  last touched: turn {}", submap.last_touched());
    println!("  fields: {} (fire: {})", submap.field_count(), submap.has_fire());
    println!("  items: {}", submap.item_count());
    println!("  vehicles: {}", submap.vehicles().len());
    println!("  power parts: {}", submap.power_parts().count());
    Ok(())
}
