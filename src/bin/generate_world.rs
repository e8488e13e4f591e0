//! World generator binary: pre-generates the map around the origin.
//!
//! Usage: cargo run --release --bin generate_world -- [OPTIONS]
//!
//! Options:
//!   --world <DIR>       World directory (default: "worlds/world")
//!   --seed <SEED>       Map seed, overrides world.json
//!   --radius <BLOCKS>   Horizontal radius in blocks (default: 8)
//!   --height <BLOCKS>   Vertical radius in blocks (default: 4)
//!   --mapgen <NAME>     "v6" or "singlenode" (default: v6)
//!   --jobs <N>          Generator threads (default: 4)
//!
//! Output structure:
//!   <world>/
//!     world.json        # WorldSettings
//!     env_meta.json     # Environment clocks
//!     map/              # One file per block
//!       y_0/block_0_0_0.bin
//!       ...

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use sandvox::core::types::{IVec2, IVec3};
use sandvox::core::{Result, WorldSettings};
use sandvox::environment::LogicEnvironment;
use sandvox::generation::emerge::GeneratorFactory;
use sandvox::generation::{EmergeManager, MapGenerator, MapgenSinglenode, MapgenV6};
use sandvox::map::{FileDatabase, LogicMap, MapAccess};
use sandvox::voxel::block::ModifiedState;
use sandvox::voxel::NodeDefManager;

fn main() {
    sandvox::core::logging::init_tool();

    if let Err(e) = run() {
        log::error!("World generation failed: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let world_dir = PathBuf::from(parse_str_arg(&args, "--world").unwrap_or_else(|| "worlds/world".to_string()));
    let radius = parse_arg::<i32>(&args, "--radius").unwrap_or(8);
    let height = parse_arg::<i32>(&args, "--height").unwrap_or(4);
    let mapgen = parse_str_arg(&args, "--mapgen").unwrap_or_else(|| "v6".to_string());
    let jobs = parse_arg::<usize>(&args, "--jobs").unwrap_or(4);

    std::fs::create_dir_all(&world_dir)?;
    let mut settings = load_settings(&world_dir)?;
    if let Some(seed) = parse_arg::<u64>(&args, "--seed") {
        settings.seed = seed;
    }
    settings.save(&world_dir.join("world.json"))?;

    println!("=== Sandvox World Generator ===");
    println!("World:  {}", world_dir.display());
    println!("Mapgen: {}", mapgen);
    println!("Seed:   {}", settings.seed);
    println!("Area:   {} blocks radius, {} blocks up and down", radius, height);
    println!("Jobs:   {} parallel", jobs);
    println!();

    let defs = Arc::new(NodeDefManager::with_default_content());
    let factory = generator_factory(&mapgen, &settings)?;
    let mut emerge = EmergeManager::new(factory, jobs)?;
    let db = FileDatabase::open(world_dir.join("map"))?;
    let mut map = LogicMap::new(defs, Box::new(db), &settings);

    let mut wanted = 0usize;
    for z in -radius..=radius {
        for y in -height..=height {
            for x in -radius..=radius {
                map.get_block_or_emerge(IVec3::new(x, y, z));
                wanted += 1;
            }
        }
    }

    let start = Instant::now();
    let mut ready: HashSet<IVec3> = HashSet::new();
    let mut modified = HashSet::new();
    let mut last_report = Instant::now();
    loop {
        ready.extend(map.run_emerge(&mut emerge, &mut modified));
        if map.emerge_queue_len() == 0 && emerge.pending_count() == 0 {
            break;
        }
        if last_report.elapsed() > Duration::from_secs(2) {
            let rate = ready.len() as f64 / start.elapsed().as_secs_f64();
            eprintln!("  [{}/{}] {:.0} blocks/sec, {} chunks pending", ready.len(), wanted, rate, emerge.pending_count());
            last_report = Instant::now();
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    let elapsed = start.elapsed();

    map.begin_save();
    let saved = map.save(ModifiedState::WriteNeeded);
    map.end_save();

    let spawn = emerge.spawn_level_at_point(IVec2::ZERO);
    let loaded = map.loaded_block_count();

    let mut env = LogicEnvironment::new(map, settings, &world_dir);
    env.load_meta()?;
    env.save_meta()?;

    println!();
    println!("=== Generation Complete ===");
    println!("Blocks: {} ready of {} requested, {} loaded", ready.len(), wanted, loaded);
    println!("Saved:  {} blocks in {:.1}s", saved, elapsed.as_secs_f64());
    match spawn {
        Some(y) => println!("Spawn:  y = {}", y),
        None => println!("Spawn:  none at the origin column"),
    }
    println!("Output: {}", world_dir.display());
    if let Some(block) = env.map().get_block_no_create(IVec3::ZERO) {
        log::debug!("Origin block generated: {}", block.is_generated());
    }
    Ok(())
}

fn load_settings(world_dir: &Path) -> Result<WorldSettings> {
    let path = world_dir.join("world.json");
    if path.exists() {
        log::info!("Using settings from {}", path.display());
        WorldSettings::from_file(&path)
    } else {
        Ok(WorldSettings::default())
    }
}

fn generator_factory(name: &str, settings: &WorldSettings) -> Result<GeneratorFactory> {
    let settings = settings.clone();
    let factory: GeneratorFactory = match name {
        "v6" => Arc::new(move || Box::new(MapgenV6::new(&settings)) as Box<dyn MapGenerator>),
        "singlenode" => Arc::new(move || Box::new(MapgenSinglenode::new(&settings, "air")) as Box<dyn MapGenerator>),
        other => {
            return Err(sandvox::core::Error::Config(format!("unknown mapgen {:?}", other)));
        }
    };
    Ok(factory)
}

fn parse_arg<T: std::str::FromStr>(args: &[String], flag: &str) -> Option<T> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
}

fn parse_str_arg(args: &[String], flag: &str) -> Option<String> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}
