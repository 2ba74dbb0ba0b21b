use std::fs;
use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use mapnav::routing::{MultiRouteOptions, RouteOptions};
use mapnav::{MapId, MapNav, Settings};
use mapnav_geometry::NormalizedPoint;
use mapnav_navigation::SmoothingLevel;
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "mapnav", version, about = "Floor-plan preprocessing and route queries")]
struct Cli {
    /// Configuration file. Defaults to config/default.toml when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Upload a raster and build its navigation grid.
    Preprocess {
        #[arg(long)]
        image: PathBuf,
        /// Display name, the file stem by default.
        #[arg(long)]
        name: Option<String>,
        /// Meters per pixel.
        #[arg(long, default_value_t = 1.0)]
        scale: f64,
        #[arg(long)]
        force: bool,
    },
    /// Route between two points.
    Route {
        #[command(flatten)]
        pair: PointPair,
        #[command(flatten)]
        route: RouteFlags,
    },
    /// Route through several stops in order.
    Multi {
        #[arg(long)]
        map: String,
        /// Stop as `x,y`; repeat for each stop.
        #[arg(long = "point", value_parser = parse_point, required = true)]
        points: Vec<NormalizedPoint>,
        #[arg(long)]
        optimize_order: bool,
        #[arg(long)]
        return_to_start: bool,
        #[command(flatten)]
        route: RouteFlags,
    },
    /// The optimal route plus differing variants.
    Alternatives {
        #[command(flatten)]
        pair: PointPair,
        #[command(flatten)]
        route: RouteFlags,
    },
    /// Check whether a point is walkable, proposing a correction if not.
    Validate {
        #[arg(long)]
        map: String,
        #[arg(long, value_parser = parse_point)]
        point: NormalizedPoint,
    },
    /// List known maps.
    Maps,
}

#[derive(Debug, Args)]
struct PointPair {
    #[arg(long)]
    map: String,
    #[arg(long, value_parser = parse_point)]
    start: NormalizedPoint,
    #[arg(long, value_parser = parse_point)]
    end: NormalizedPoint,
}

#[derive(Debug, Args)]
struct RouteFlags {
    /// none, low, medium or high.
    #[arg(long, default_value = "medium")]
    smoothing: SmoothingLevel,
    #[arg(long)]
    no_diagonal: bool,
    #[arg(long)]
    no_cache: bool,
    #[arg(long)]
    auto_correct: bool,
}

impl From<&RouteFlags> for RouteOptions {
    fn from(flags: &RouteFlags) -> Self {
        RouteOptions {
            smoothing_level: flags.smoothing,
            use_cache: !flags.no_cache,
            allow_diagonal: !flags.no_diagonal,
            auto_correct: flags.auto_correct,
        }
    }
}

/// Parses `x,y` in normalized coordinates.
fn parse_point(s: &str) -> Result<NormalizedPoint, String> {
    let (x, y) = s
        .split_once(',')
        .ok_or_else(|| format!("expected x,y but got '{}'", s))?;
    let x: f64 = x.trim().parse().map_err(|e| format!("bad x '{}': {}", x, e))?;
    let y: f64 = y.trim().parse().map_err(|e| format!("bad y '{}': {}", y, e))?;
    Ok(NormalizedPoint::new(x, y))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;
    let nav = MapNav::from_settings(&settings);

    match cli.command {
        Command::Preprocess {
            image,
            name,
            scale,
            force,
        } => {
            let bytes = fs::read(&image)
                .with_context(|| format!("failed to read {}", image.display()))?;
            let name = name.unwrap_or_else(|| {
                image
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "map".to_string())
            });
            let map_id = nav.upload(name, bytes, scale)?;
            let summary = nav.preprocess(&map_id, force)?.wait().await?;
            info!(map_id = %map_id, "preprocessing finished");
            print_json(&summary)?;
        }
        Command::Route { pair, route } => {
            nav.restore()?;
            let result = nav
                .router()
                .find_route(&MapId::from(pair.map), pair.start, pair.end, &RouteOptions::from(&route))
                .await?;
            print_json(&result)?;
        }
        Command::Multi {
            map,
            points,
            optimize_order,
            return_to_start,
            route,
        } => {
            if points.len() < 2 {
                bail!("a multi-stop route needs at least two --point values");
            }
            nav.restore()?;
            let base = RouteOptions::from(&route);
            let options = MultiRouteOptions {
                optimize_order,
                return_to_start,
                ..MultiRouteOptions::from(base)
            };
            let result = nav
                .router()
                .find_multi_route(&MapId::from(map), &points, &options)
                .await?;
            print_json(&result)?;
        }
        Command::Alternatives { pair, route } => {
            nav.restore()?;
            let result = nav
                .router()
                .find_alternative_routes(
                    &MapId::from(pair.map),
                    pair.start,
                    pair.end,
                    &RouteOptions::from(&route),
                )
                .await?;
            print_json(&result)?;
        }
        Command::Validate { map, point } => {
            nav.restore()?;
            let result = nav.router().validate_point(&MapId::from(map), point)?;
            print_json(&result)?;
        }
        Command::Maps => {
            nav.restore()?;
            print_json(&nav.registry().list())?;
        }
    }
    Ok(())
}
