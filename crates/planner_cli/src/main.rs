use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use shape_planner_core::map::LayerSurface;
use shape_planner_core::routing::{self, OsrmRouter, StraightLineRouter};
use shape_planner_core::shape::total_distance;
use shape_planner_core::{
    load_catalog_from_path, CatalogOrder, HttpShapeSink, PlannerState, RoutePlanner, ShapeSink,
    ShapeStore,
};
use shape_planner_model::RouteId;

#[derive(Debug, Parser)]
#[command(name = "shape-planner")]
#[command(about = "Plan routes between transit stops and save them as shapes.txt fragments")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List the stops of a stops.txt file.
    Stops {
        #[arg(short = 's', long = "stops", default_value = "data/stops.txt")]
        stops: PathBuf,

        #[arg(short = 'o', long = "order", value_enum, default_value_t = OrderArg::Source)]
        order: OrderArg,

        /// Only stops the planner can offer (id, name and position present).
        #[arg(long = "selectable")]
        selectable: bool,

        #[arg(long = "json")]
        json: bool,
    },
    /// Route between two stops and save the annotated shape.
    Plan {
        #[arg(short = 's', long = "stops", default_value = "data/stops.txt")]
        stops: PathBuf,

        #[arg(long = "from")]
        from: String,

        #[arg(long = "to")]
        to: String,

        #[arg(short = 'r', long = "router", value_enum, default_value_t = RouterArg::Osrm)]
        router: RouterArg,

        #[arg(long = "osrm-url", default_value = routing::DEFAULT_OSRM_URL)]
        osrm_url: String,

        #[arg(long = "profile", default_value = routing::DEFAULT_OSRM_PROFILE)]
        profile: String,

        /// Post the shape to a running server instead of writing it locally.
        #[arg(long = "server", conflicts_with = "shapes_dir")]
        server: Option<String>,

        #[arg(short = 'd', long = "shapes-dir", alias = "shapes_dir")]
        shapes_dir: Option<PathBuf>,

        #[arg(long = "timeout", default_value_t = 30)]
        timeout_secs: u64,

        #[arg(long = "json")]
        json: bool,
    },
    /// Print a saved shape file.
    ShowShape {
        route_id: String,

        #[arg(short = 'd', long = "shapes-dir", default_value = "data/shapes")]
        shapes_dir: PathBuf,

        #[arg(long = "json")]
        json: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OrderArg {
    Source,
    Name,
}

impl From<OrderArg> for CatalogOrder {
    fn from(value: OrderArg) -> Self {
        match value {
            OrderArg::Source => CatalogOrder::Source,
            OrderArg::Name => CatalogOrder::ByName,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum RouterArg {
    Osrm,
    Straight,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(false).init();
    let args = Args::parse();

    match args.command {
        Command::Stops {
            stops,
            order,
            selectable,
            json,
        } => list_stops(&stops, order.into(), selectable, json),
        Command::Plan {
            stops,
            from,
            to,
            router,
            osrm_url,
            profile,
            server,
            shapes_dir,
            timeout_secs,
            json,
        } => {
            let timeout = Duration::from_secs(timeout_secs);
            let router: Box<dyn routing::Router> = match router {
                RouterArg::Osrm => Box::new(OsrmRouter::new(osrm_url, profile).with_timeout(timeout)),
                RouterArg::Straight => Box::new(StraightLineRouter::default()),
            };
            let sink: Box<dyn ShapeSink> = match (server, shapes_dir) {
                (Some(server), _) => Box::new(HttpShapeSink::new(server)),
                (None, dir) => {
                    let dir = dir.unwrap_or_else(|| PathBuf::from("data/shapes"));
                    Box::new(
                        ShapeStore::open(&dir)
                            .with_context(|| format!("open shapes directory {}", dir.display()))?,
                    )
                }
            };
            plan(&stops, &from, &to, router.as_ref(), sink.as_ref(), json)
        }
        Command::ShowShape {
            route_id,
            shapes_dir,
            json,
        } => show_shape(&route_id, shapes_dir, json),
    }
}

fn list_stops(
    path: &std::path::Path,
    order: CatalogOrder,
    selectable: bool,
    json: bool,
) -> anyhow::Result<()> {
    let catalog = load_catalog_from_path(path, order)
        .with_context(|| format!("load stops from {}", path.display()))?;
    let stops: Vec<_> = if selectable {
        catalog.selectable().collect()
    } else {
        catalog.stops().iter().collect()
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&stops)?);
    } else {
        for stop in &stops {
            let position = stop
                .position()
                .map(|p| p.to_string())
                .unwrap_or_else(|| "(no position)".to_string());
            println!(
                "{:<16} {:<32} {:<8} {}",
                stop.stop_id,
                stop.display_name(),
                stop.stop_code.as_deref().unwrap_or(""),
                position
            );
        }
    }

    for notice in catalog.notices() {
        warn!("row {}: {}", notice.row, notice.message);
    }
    if catalog.skipped_count() > 0 {
        warn!(
            "{} rows cannot be offered to the planner",
            catalog.skipped_count()
        );
    }
    Ok(())
}

fn plan(
    stops: &std::path::Path,
    from: &str,
    to: &str,
    router: &dyn routing::Router,
    sink: &dyn ShapeSink,
    json: bool,
) -> anyhow::Result<()> {
    let catalog = load_catalog_from_path(stops, CatalogOrder::ByName)
        .with_context(|| format!("load stops from {}", stops.display()))?;
    let mut planner = RoutePlanner::new(LayerSurface::new(), Arc::new(catalog));
    planner.select_start(from);
    planner.select_end(to);
    match planner.state() {
        PlannerState::RouteError(err) => bail!("cannot plan {} -> {}: {}", from, to, err),
        PlannerState::ComputingRoute { .. } => {}
        other => bail!("cannot plan {} -> {}: {}", from, to, other.name()),
    }

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message(format!("routing with {}", router.name()));
    spinner.enable_steady_tick(Duration::from_millis(100));
    let result = planner.plan_blocking(router, sink);
    spinner.finish_and_clear();

    let summary = result.with_context(|| format!("plan {} -> {}", from, to))?;
    if let Some(route) = planner.ready_route() {
        info!(
            "planned {} points, {:.2} m along the path",
            route.points.len(),
            total_distance(&route.points)
        );
    }
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("{}", summary);
    }
    Ok(())
}

fn show_shape(route_id: &str, shapes_dir: PathBuf, json: bool) -> anyhow::Result<()> {
    let route_id = RouteId::parse(route_id).context("invalid route id")?;
    let store = ShapeStore::new(shapes_dir);
    if json {
        let shapes = store.load(&route_id)?;
        println!("{}", serde_json::to_string_pretty(&shapes)?);
        return Ok(());
    }
    let raw = store.read_raw(&route_id)?;
    print!("{}", raw);
    let shapes = store.load(&route_id)?;
    let length = shapes
        .last()
        .and_then(|shape| shape.shape_dist_traveled)
        .unwrap_or(0.0);
    info!(
        "{}: {} points, {:.2} m",
        store.path_for(&route_id).display(),
        shapes.len(),
        length
    );
    Ok(())
}
