//! Stackfuse CLI: build, align, mask and fuse focus stacks.
//!
//! Usage:
//!   stackfuse init <NAME>                 Create a new project
//!   stackfuse add <PATH> <IMAGES>...      Append images to the stack
//!   stackfuse remove <PATH> <INDEX>...    Remove images from the stack
//!   stackfuse mask <PATH> <INDEX>         Add or clear masks on one image
//!   stackfuse align <PATH>                Align the stack
//!   stackfuse fuse <PATH>                 Align, mask and fuse the stack
//!   stackfuse preview <PATH> <INDEX>      Render a viewport-sized preview
//!   stackfuse info <PATH>                 Show project information
//!   stackfuse validate <PATH>             Validate a project
//!   stackfuse check                       Check external tools

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use stackfuse_common::config::{config_file_path, AppConfig};

mod commands;

use commands::mask::MaskKindArg;
use commands::preview::SurfaceArg;

#[derive(Parser)]
#[command(
    name = "stackfuse",
    about = "Focus stacking with ECC alignment and masked fusion",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (defaults to the per-user config)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new empty project
    Init {
        /// Project name
        name: String,

        /// Parent directory
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },

    /// Append images to the stack
    Add {
        /// Path to the project directory
        path: PathBuf,

        /// Image files, in stack order
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },

    /// Remove images (by zero-based index) from the stack
    Remove {
        /// Path to the project directory
        path: PathBuf,

        #[arg(required = true)]
        indices: Vec<usize>,
    },

    /// Add a mask to one image, or clear its masks
    Mask {
        /// Path to the project directory
        path: PathBuf,

        /// Zero-based image index
        index: usize,

        /// Mask kind
        #[arg(short, long, value_enum, default_value = "include")]
        kind: MaskKindArg,

        /// Rectangle as x0,y0,x1,y1
        #[arg(long, conflicts_with = "polygon")]
        rect: Option<String>,

        /// Polygon as "x,y x,y x,y ..."
        #[arg(long)]
        polygon: Option<String>,

        /// Coordinates were taken on a preview scaled by this factor
        #[arg(long)]
        preview_scale: Option<f64>,

        /// Remove every mask on the image instead
        #[arg(long, conflicts_with_all = ["rect", "polygon"])]
        clear: bool,
    },

    /// Align the stack against its middle image
    Align {
        /// Path to the project directory
        path: PathBuf,

        /// Use align_image_stack instead of the built-in aligner
        #[arg(long)]
        external: bool,

        /// Alignment worker count
        #[arg(long)]
        pool_size: Option<usize>,

        /// ECC iterations per pyramid level
        #[arg(long)]
        iterations: Option<u32>,

        /// Number of pyramid levels (default: from image width)
        #[arg(long)]
        levels: Option<u32>,
    },

    /// Align, mask and fuse the stack
    Fuse {
        /// Path to the project directory
        path: PathBuf,

        /// Skip alignment and fuse the images as they are
        #[arg(long)]
        no_align: bool,

        /// Use align_image_stack instead of the built-in aligner
        #[arg(long)]
        external: bool,

        /// Pass --hard-mask to the fusion tool
        #[arg(long)]
        hard_mask: bool,

        /// Alpha painted inside exclude regions
        #[arg(long)]
        exclude_alpha: Option<u8>,

        /// Output file name inside the work directory
        #[arg(short, long)]
        output_name: Option<String>,
    },

    /// Render a viewport-sized preview of one image
    Preview {
        /// Path to the project directory
        path: PathBuf,

        /// Zero-based image index (ignored for the stacked surface)
        #[arg(default_value = "0")]
        index: usize,

        /// Which image to preview
        #[arg(short, long, value_enum, default_value = "input")]
        surface: SurfaceArg,

        /// Viewport width (default: from config)
        #[arg(long)]
        width: Option<u32>,

        /// Viewport height (default: from config)
        #[arg(long)]
        height: Option<u32>,

        /// Output PNG
        #[arg(short, long, default_value = "preview.png")]
        output: PathBuf,
    },

    /// Show project information
    Info {
        /// Path to the project directory
        path: PathBuf,
    },

    /// Validate a project
    Validate {
        /// Path to the project directory
        path: PathBuf,
    },

    /// Check that the external tools are installed
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(config_file_path);
    let mut config = AppConfig::load_from(&config_path);

    // Initialize logging
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    stackfuse_common::logging::init_logging(&config.logging);

    match cli.command {
        Commands::Init { name, output } => commands::init::run(name, output),
        Commands::Add { path, images } => commands::add::run(path, images, &config_path),
        Commands::Remove { path, indices } => commands::remove::run(path, indices),
        Commands::Mask {
            path,
            index,
            kind,
            rect,
            polygon,
            preview_scale,
            clear,
        } => commands::mask::run(path, index, kind, rect, polygon, preview_scale, clear),
        Commands::Align {
            path,
            external,
            pool_size,
            iterations,
            levels,
        } => {
            if external {
                config.external_align.enabled = true;
            }
            if pool_size.is_some() {
                config.alignment.pool_size = pool_size;
            }
            if let Some(iterations) = iterations {
                config.alignment.iterations = iterations;
            }
            if levels.is_some() {
                config.alignment.pyramid_levels = levels;
            }
            commands::align::run(path, config).await
        }
        Commands::Fuse {
            path,
            no_align,
            external,
            hard_mask,
            exclude_alpha,
            output_name,
        } => {
            if external {
                config.external_align.enabled = true;
            }
            if hard_mask {
                config.fusion.hard_mask = true;
            }
            if let Some(alpha) = exclude_alpha {
                config.fusion.exclude_alpha = alpha;
            }
            if let Some(name) = output_name {
                config.fusion.output_name = name;
            }
            commands::fuse::run(path, config, !no_align).await
        }
        Commands::Preview {
            path,
            index,
            surface,
            width,
            height,
            output,
        } => {
            let width = width.unwrap_or(config.preview.width);
            let height = height.unwrap_or(config.preview.height);
            commands::preview::run(path, index, surface, width, height, output, &config)
        }
        Commands::Info { path } => commands::info::run(path, &config),
        Commands::Validate { path } => commands::validate::run(path),
        Commands::Check => commands::check::run(&config, &config_path),
    }
}
