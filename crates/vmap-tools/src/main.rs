// vmaptool - query precomputed vmap data from the command line

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};

use mangos_shared::config::Config;
use mangos_shared::log::{initialize_logging, map_log_level};
use mangos_vmap::{
    GameObjectModelList, LoadResult, ModelIgnoreFlags, QueryResult, TileCoord, VMapConfig,
    VMapManager, Vec3, Visibility,
};

/// Default config file name
const DEFAULT_CONFIG: &str = "vmap.conf";

#[derive(Parser, Debug)]
#[command(name = "vmaptool")]
#[command(about = "CMaNGOS TBC VMap query tool")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = DEFAULT_CONFIG)]
    config: String,

    /// Data directory holding vmaps/ (overrides DataDir)
    #[arg(short, long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Console log level override (0=Minimum, 1=Error, 2=Detail, 3=Full/Debug, 4=Trace)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<i32>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check whether a tile of a map can be loaded
    Exists(TileArgs),
    /// Line of sight between two positions
    Los(SegmentArgs),
    /// Ground height below a position
    Height(HeightArgs),
    /// Area identification below a position
    Area(PointArgs),
    /// Liquid level and combined area data at a position
    Liquid(LiquidArgs),
    /// First collision between two positions
    Hitpos(HitPosArgs),
    /// List the game object model registry
    Gobjects(GameObjectArgs),
}

#[derive(Args, Debug)]
struct TileArgs {
    map_id: u32,
    tile_x: u32,
    tile_y: u32,
}

#[derive(Args, Debug)]
struct SegmentArgs {
    map_id: u32,
    /// Start position (format: X,Y,Z)
    #[arg(value_parser = parse_position)]
    from: Vec3,
    /// End position (format: X,Y,Z)
    #[arg(value_parser = parse_position)]
    to: Vec3,
    /// Ignore M2 models
    #[arg(long = "ignore-m2")]
    ignore_m2: bool,
}

#[derive(Args, Debug)]
struct HeightArgs {
    map_id: u32,
    /// Position (format: X,Y,Z)
    #[arg(value_parser = parse_position)]
    pos: Vec3,
    /// Maximum search distance below the position
    #[arg(long = "max-dist", default_value_t = 100.0)]
    max_search_dist: f32,
}

#[derive(Args, Debug)]
struct PointArgs {
    map_id: u32,
    /// Position (format: X,Y,Z)
    #[arg(value_parser = parse_position)]
    pos: Vec3,
}

#[derive(Args, Debug)]
struct LiquidArgs {
    map_id: u32,
    /// Position (format: X,Y,Z)
    #[arg(value_parser = parse_position)]
    pos: Vec3,
    /// Required liquid type mask, 0 accepts any liquid
    #[arg(long = "mask", default_value_t = 0)]
    req_liquid_type: u32,
}

#[derive(Args, Debug)]
struct HitPosArgs {
    map_id: u32,
    /// Start position (format: X,Y,Z)
    #[arg(value_parser = parse_position)]
    from: Vec3,
    /// End position (format: X,Y,Z)
    #[arg(value_parser = parse_position)]
    to: Vec3,
    /// Distance to move the hit point along the ray
    #[arg(long = "modify-dist", default_value_t = 0.0, allow_hyphen_values = true)]
    modify_dist: f32,
}

#[derive(Args, Debug)]
struct GameObjectArgs {
    /// Only show this display id
    #[arg(long = "display-id")]
    display_id: Option<u32>,
}

fn parse_position(input: &str) -> Result<Vec3, String> {
    let parts: Vec<&str> = input.split(',').collect();
    let [x, y, z] = parts.as_slice() else {
        return Err(format!("Expected X,Y,Z but got '{}'", input));
    };
    let parse = |value: &str, axis: &str| {
        value
            .trim()
            .parse::<f32>()
            .map_err(|_| format!("Invalid {} coordinate '{}'", axis, value))
    };
    Ok(Vec3::new(parse(x, "X")?, parse(y, "Y")?, parse(z, "Z")?))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::new();
    let config_loaded = config.set_source(&cli.config, "Vmap_");

    let console_level = map_log_level(
        cli.log_level
            .unwrap_or_else(|| config.get_int_default("LogLevel", 2)),
    );
    let log_dir = config.get_string("LogsDir");
    let _guard = initialize_logging(
        (!log_dir.is_empty()).then_some(log_dir.as_str()),
        console_level,
        Some("vmaptool.log"),
    );

    if !config_loaded {
        // every setting has a default, the file is optional
        tracing::warn!("Could not read {}, using defaults", cli.config);
    }

    let mut vmap_config = VMapConfig::from_config(&config);
    if let Some(dir) = cli.data_dir {
        vmap_config.data_dir = dir;
    }
    tracing::info!("Using vmaps from {}", vmap_config.vmaps_dir().display());

    let manager = VMapManager::new(&vmap_config);
    match cli.command {
        Command::Exists(args) => run_exists(&manager, args),
        Command::Los(args) => run_los(&manager, args),
        Command::Height(args) => run_height(&manager, args),
        Command::Area(args) => run_area(&manager, args),
        Command::Liquid(args) => run_liquid(&manager, args),
        Command::Hitpos(args) => run_hitpos(&manager, args),
        Command::Gobjects(args) => run_gobjects(&vmap_config, args),
    }
}

/// Loads the tiles under `positions`, runs `query` and unloads the map.
fn with_loaded_tiles<T>(
    manager: &VMapManager,
    map_id: u32,
    positions: &[Vec3],
    query: impl FnOnce() -> T,
) -> anyhow::Result<T> {
    let mut loaded = false;
    for pos in positions {
        let tile = TileCoord::from_world(pos.x, pos.y)
            .with_context(|| format!("Position {} is outside the map grid", pos))?;
        let result = manager.load_map(map_id, tile.x, tile.y);
        tracing::debug!("Loading map {} tile {},{}: {}", map_id, tile.x, tile.y, result);
        match result {
            LoadResult::Success => loaded = true,
            LoadResult::FileNotFound => {}
            other => anyhow::bail!("Could not load map {} tile {},{}: {}", map_id, tile.x, tile.y, other),
        }
    }
    if !loaded {
        tracing::warn!("No vmap data loaded for map {}", map_id);
    }

    let value = query();
    manager.unload_map(map_id);
    Ok(value)
}

fn describe<T>(result: &QueryResult<T>) -> &'static str {
    match result {
        QueryResult::Disabled => "disabled",
        QueryResult::NotLoaded => "no data loaded",
        QueryResult::NotFound => "nothing found",
        QueryResult::Found(_) => "found",
    }
}

fn run_exists(manager: &VMapManager, args: TileArgs) -> anyhow::Result<()> {
    let result = manager.exists_map(args.map_id, args.tile_x, args.tile_y);
    println!("map {} tile {},{}: {}", args.map_id, args.tile_x, args.tile_y, result);
    if let Some(parent) = manager.get_parent_map_id(args.map_id) {
        println!("parent map: {}", parent);
    }
    Ok(())
}

fn run_los(manager: &VMapManager, args: SegmentArgs) -> anyhow::Result<()> {
    let ignore = if args.ignore_m2 {
        ModelIgnoreFlags::M2
    } else {
        ModelIgnoreFlags::empty()
    };
    let result = with_loaded_tiles(manager, args.map_id, &[args.from, args.to], || {
        manager.query_line_of_sight(args.map_id, args.from, args.to, ignore)
    })?;
    match result {
        QueryResult::Found(Visibility::Clear) => println!("clear"),
        QueryResult::Found(Visibility::Blocked) => println!("blocked"),
        other => println!("clear ({})", describe(&other)),
    }
    Ok(())
}

fn run_height(manager: &VMapManager, args: HeightArgs) -> anyhow::Result<()> {
    let result = with_loaded_tiles(manager, args.map_id, &[args.pos], || {
        manager.query_height(args.map_id, args.pos, args.max_search_dist)
    })?;
    match result {
        QueryResult::Found(height) => println!("height: {:.3}", height),
        other => println!("height: invalid ({})", describe(&other)),
    }
    Ok(())
}

fn run_area(manager: &VMapManager, args: PointArgs) -> anyhow::Result<()> {
    let result = with_loaded_tiles(manager, args.map_id, &[args.pos], || {
        manager.query_area_info(args.map_id, args.pos)
    })?;
    match result {
        QueryResult::Found(hit) => println!(
            "floor: {:.3} adt: {} root: {} group: {} flags: 0x{:X}",
            hit.floor_z, hit.info.adt_id, hit.info.root_id, hit.info.group_id, hit.info.mogp_flags
        ),
        other => println!("no area ({})", describe(&other)),
    }
    Ok(())
}

fn run_liquid(manager: &VMapManager, args: LiquidArgs) -> anyhow::Result<()> {
    let (liquid, data) = with_loaded_tiles(manager, args.map_id, &[args.pos], || {
        (
            manager.query_liquid_level(args.map_id, args.pos, args.req_liquid_type),
            manager.get_area_and_liquid_data(args.map_id, args.pos, args.req_liquid_type),
        )
    })?;
    match liquid {
        QueryResult::Found(hit) => println!(
            "liquid: type {} level {:.3} floor {:.3} flags 0x{:X}",
            hit.liquid_type, hit.level, hit.floor_z, hit.mogp_flags
        ),
        other => println!("no liquid ({})", describe(&other)),
    }
    println!("floor: {:.3}", data.floor_z);
    if let Some(area) = data.area_info {
        println!(
            "area: adt {} root {} group {} flags 0x{:X}",
            area.adt_id, area.root_id, area.group_id, area.mogp_flags
        );
    }
    if let Some(liquid) = data.liquid_info {
        println!("liquid info: type {} level {:.3}", liquid.liquid_type, liquid.level);
    }
    Ok(())
}

fn run_hitpos(manager: &VMapManager, args: HitPosArgs) -> anyhow::Result<()> {
    let result = with_loaded_tiles(manager, args.map_id, &[args.from, args.to], || {
        manager.query_object_hit_pos(args.map_id, args.from, args.to, args.modify_dist)
    })?;
    match result {
        QueryResult::Found(pos) => println!("hit: {:.3},{:.3},{:.3}", pos.x, pos.y, pos.z),
        other => println!("no hit ({})", describe(&other)),
    }
    Ok(())
}

fn run_gobjects(config: &VMapConfig, args: GameObjectArgs) -> anyhow::Result<()> {
    let models = GameObjectModelList::load(&config.vmaps_dir());
    let mut entries: Vec<_> = models
        .iter()
        .filter(|(id, _)| args.display_id.is_none_or(|wanted| wanted == *id))
        .collect();
    entries.sort_by_key(|(id, _)| *id);
    for (display_id, data) in entries {
        println!(
            "{:>6} {} {} [{:.2},{:.2},{:.2}]-[{:.2},{:.2},{:.2}]",
            display_id,
            if data.is_wmo { "wmo" } else { "m2 " },
            data.name,
            data.bound.lo.x,
            data.bound.lo.y,
            data.bound.lo.z,
            data.bound.hi.x,
            data.bound.hi.y,
            data.bound.hi.z
        );
    }
    println!("{} models", models.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_position() {
        assert_eq!(parse_position("1,2.5,-3").unwrap(), Vec3::new(1.0, 2.5, -3.0));
        assert_eq!(parse_position(" 4 , 5 , 6 ").unwrap(), Vec3::new(4.0, 5.0, 6.0));
        assert!(parse_position("1,2").is_err());
        assert!(parse_position("1,2,x").is_err());
    }

    #[test]
    fn test_cli_parses_queries() {
        let cli = Cli::try_parse_from(["vmaptool", "-d", "/data", "los", "0", "1,2,3", "4,5,6", "--ignore-m2"]).unwrap();
        assert_eq!(cli.data_dir, Some(PathBuf::from("/data")));
        match cli.command {
            Command::Los(args) => {
                assert_eq!(args.map_id, 0);
                assert_eq!(args.to, Vec3::new(4.0, 5.0, 6.0));
                assert!(args.ignore_m2);
            }
            other => panic!("unexpected command {:?}", other),
        }

        let cli = Cli::try_parse_from(["vmaptool", "hitpos", "1", "0,0,0", "10,0,0", "--modify-dist", "-0.5"]).unwrap();
        match cli.command {
            Command::Hitpos(args) => assert_eq!(args.modify_dist, -0.5),
            other => panic!("unexpected command {:?}", other),
        }
    }
}
