//! scene-stack CLI: reconcile scene extents and assemble pixel-aligned stacks

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use env_logger::{Builder, Env, Target};
use log::info;
use std::fs::File;
use std::path::{Path, PathBuf};

use scenestack::core::extent_report_document;
use scenestack::{
    AssemblyParams, BandSelection, ExtentPolicy, ExtentReconciler, MetadataReader, MetadataWriter,
    OverlapPriority, ReconcileParams, Reconciliation, SceneDescriptor, StackAssembler, StackLayout,
};

#[derive(Parser)]
#[command(name = "scene-stack")]
#[command(author, version, about = "Reconcile raster scene extents and assemble pixel-aligned stacks", long_about = None)]
struct Cli {
    /// Log level filter (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Write log output to this file instead of stderr
    #[arg(long, global = true)]
    logfile: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct SceneArgs {
    /// Scene metadata documents
    scenes: Vec<PathBuf>,

    /// File listing one scene metadata document per line
    #[arg(long)]
    scene_list: Option<PathBuf>,

    /// How scene extents combine
    #[arg(long, value_enum, default_value = "union")]
    policy: PolicyArg,

    /// Pixel size and alignment tolerance
    #[arg(long, default_value = "1e-6")]
    tolerance: f64,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute and report the common extent of a set of scenes
    Extent {
        #[command(flatten)]
        scenes: SceneArgs,

        /// Write the extent report to this XML file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Assemble scenes into a stack on their common grid
    Stack {
        #[command(flatten)]
        scenes: SceneArgs,

        /// Directory receiving the stack
        #[arg(short, long)]
        output_dir: PathBuf,

        /// Reuse a previously written extent report instead of reconciling
        #[arg(long)]
        extent: Option<PathBuf>,

        /// One output band per scene band, or one per band name across scenes
        #[arg(long, value_enum, default_value = "per-scene")]
        mode: ModeArg,

        /// Comma separated band names (default: all bands)
        #[arg(long, value_delimiter = ',')]
        bands: Option<Vec<String>>,

        /// Which scene owns overlapping pixels
        #[arg(long, value_enum, default_value = "first")]
        priority: PriorityArg,

        /// One file per band, or one band-sequential file
        #[arg(long, value_enum, default_value = "band-files")]
        layout: LayoutArg,

        /// Base name of the output product
        #[arg(long, default_value = "stack")]
        product_name: String,

        /// Fill value for bands that declare none
        #[arg(long, default_value = "-9999", allow_hyphen_values = true)]
        fill_value: f64,

        /// Worker threads (0 = all cores)
        #[arg(short = 'p', long, default_value = "0")]
        parallel: usize,

        /// Remove source band files after a successful run
        #[arg(long)]
        delete_src: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum PolicyArg {
    Union,
    Intersection,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    PerScene,
    Mosaic,
}

#[derive(Clone, Copy, ValueEnum)]
enum PriorityArg {
    First,
    Last,
    MostRecent,
}

#[derive(Clone, Copy, ValueEnum)]
enum LayoutArg {
    BandFiles,
    Bsq,
}

impl From<PolicyArg> for ExtentPolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Union => ExtentPolicy::Union,
            PolicyArg::Intersection => ExtentPolicy::Intersection,
        }
    }
}

impl From<PriorityArg> for OverlapPriority {
    fn from(arg: PriorityArg) -> Self {
        match arg {
            PriorityArg::First => OverlapPriority::FirstWins,
            PriorityArg::Last => OverlapPriority::LastWins,
            PriorityArg::MostRecent => OverlapPriority::MostRecentWins,
        }
    }
}

impl From<LayoutArg> for StackLayout {
    fn from(arg: LayoutArg) -> Self {
        match arg {
            LayoutArg::BandFiles => StackLayout::BandFiles,
            LayoutArg::Bsq => StackLayout::Bsq,
        }
    }
}

fn init_logging(level: &str, logfile: Option<&Path>) -> Result<()> {
    let mut builder = Builder::from_env(Env::default().default_filter_or(level));
    builder.format_timestamp_secs();
    if let Some(path) = logfile {
        let file = File::create(path).with_context(|| format!("Cannot create log file {}", path.display()))?;
        builder.target(Target::Pipe(Box::new(file)));
    }
    builder.init();
    Ok(())
}

impl SceneArgs {
    fn reconcile_params(&self) -> ReconcileParams {
        ReconcileParams {
            tolerance: self.tolerance,
            policy: self.policy.into(),
        }
    }

    fn read_scenes(&self) -> Result<Vec<SceneDescriptor>> {
        let mut paths = self.scenes.clone();
        if let Some(list) = &self.scene_list {
            paths.extend(MetadataReader::read_scene_list(list)?);
        }
        if paths.is_empty() {
            bail!("No input scenes: pass metadata documents or --scene-list");
        }
        Ok(MetadataReader::read_scenes(&paths)?)
    }
}

fn run_extent(args: &SceneArgs, output: Option<&Path>) -> Result<()> {
    let scenes = args.read_scenes()?;
    let reconciliation = ExtentReconciler::with_params(args.reconcile_params()).reconcile(&scenes)?;
    print_summary(&reconciliation);

    if let Some(path) = output {
        let report = extent_report_document(&reconciliation, &scenes);
        MetadataWriter::write_extent_report(path, &report)?;
        info!("Extent report written to {}", path.display());
    }
    Ok(())
}

fn print_summary(reconciliation: &Reconciliation) {
    let grid = &reconciliation.grid;
    let extent = &reconciliation.extent;
    println!("projection: {}", reconciliation.projection.identifier());
    println!("policy: {}", reconciliation.policy);
    println!(
        "extent: min_x={} max_x={} min_y={} max_y={}",
        extent.min_x, extent.max_x, extent.min_y, extent.max_y
    );
    println!(
        "grid: origin=({}, {}) pixel=({}, {}) rows={} cols={}",
        grid.origin_x, grid.origin_y, grid.pixel_size_x, grid.pixel_size_y, grid.rows, grid.cols
    );
    for placement in &reconciliation.placements {
        println!(
            "scene {}: offset=({}, {}) window=({}, {}, {}x{})",
            placement.scene_id,
            placement.offset.row,
            placement.offset.col,
            placement.window.row,
            placement.window.col,
            placement.window.rows,
            placement.window.cols
        );
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.logfile.as_deref())?;

    match cli.command {
        Commands::Extent { scenes, output } => run_extent(&scenes, output.as_deref()),
        Commands::Stack {
            scenes,
            output_dir,
            extent,
            mode,
            bands,
            priority,
            layout,
            product_name,
            fill_value,
            parallel,
            delete_src,
        } => {
            let descriptors = scenes.read_scenes()?;
            let reconciler = ExtentReconciler::with_params(scenes.reconcile_params());
            let reconciliation = match &extent {
                Some(report_path) => {
                    let report = MetadataReader::read_extent_report(report_path)?;
                    reconciler.place_on_grid(&report, &descriptors)?
                }
                None => reconciler.reconcile(&descriptors)?,
            };

            let band_selection = match mode {
                ModeArg::PerScene => BandSelection::PerScene { bands },
                ModeArg::Mosaic => BandSelection::Mosaic { bands },
            };
            let params = AssemblyParams {
                band_selection,
                overlap_priority: priority.into(),
                layout: layout.into(),
                product_name,
                default_fill_value: fill_value,
                num_threads: parallel,
                delete_source: delete_src,
            };

            let product = StackAssembler::with_params(params)
                .assemble(&reconciliation, &descriptors, &output_dir)
                .with_context(|| format!("Stack assembly into {} failed", output_dir.display()))?;

            for band in &product.bands {
                println!(
                    "{}: {} valid pixels from [{}] -> {}",
                    band.name,
                    band.valid_pixels,
                    band.contributors.join(", "),
                    band.file_name
                );
            }
            println!("metadata: {}", product.metadata_path.display());
            Ok(())
        }
    }
}
