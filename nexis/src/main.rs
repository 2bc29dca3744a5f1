use clap::Parser;
use env_logger::{Builder, Env};
use log::{error, info, Level};
use std::io::Write;

use nexis::color_utils::{colors, init_color_config, symbols};
use nexis::config::{
    DetectCommand, DetectionConfig, EnhanceCommand, EnhanceConfig, GlobalArgs, UpscaleCommand,
    UpscaleConfig, ViewCommand, ViewConfig,
};
use nexis::detection::run_detection;
use nexis::enhancement::run_enhancement;
use nexis::model_processing::RunSummary;
use nexis::upscale::run_upscale;
use nexis::viewer::run_view;

#[derive(clap::Subcommand)]
pub enum Commands {
    /// Upscale every image under a directory tree with a super-resolution network
    Upscale(UpscaleCommand),

    /// Upscale images and equalize their contrast with CLAHE
    Enhance(EnhanceCommand),

    /// Detect animals and save annotated copies of the images
    Detect(DetectCommand),

    /// List a directory of results and optionally render a contact sheet
    View(ViewCommand),

    /// Show version information
    Version,
}

#[derive(Parser)]
#[command(name = "nexis")]
#[command(about = "Batch super-resolution, contrast enhancement and animal detection")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

fn init_logging(global: &GlobalArgs) {
    // If user didn't pass -v/-q and RUST_LOG is set, honor the env var.
    let use_env = !global.verbosity.is_present() && std::env::var_os("RUST_LOG").is_some();

    let mut logger = if use_env {
        Builder::from_env(Env::default())
    } else {
        let mut b = Builder::new();
        b.filter_level(global.verbosity.log_level_filter());
        b
    };

    logger
        .format(|buf, record| {
            let level_str = match record.level() {
                Level::Error => colors::error_level("ERROR"),
                Level::Warn => colors::warning_level("WARN"),
                Level::Info => colors::info_level("INFO"),
                Level::Debug => colors::debug_level("DEBUG"),
                Level::Trace => colors::trace_level("TRACE"),
            };
            writeln!(buf, "[{}] {}", level_str, record.args())
        })
        .init();
}

/// Abort with exit code 1 on a precondition failure
fn fail(what: &str, message: impl std::fmt::Display) -> ! {
    error!("{}{what} failed: {message}", symbols::operation_failed());
    std::process::exit(1);
}

/// Per-file failures are already in the batch summary; only a run error exits
fn finish(what: &str, result: anyhow::Result<RunSummary>) {
    if let Err(e) = result {
        fail(what, format!("{e:#}"));
    }
}

fn main() {
    let cli = Cli::parse();
    init_color_config(cli.global.no_color);
    init_logging(&cli.global);

    match cli.command {
        Some(Commands::Upscale(cmd)) => {
            info!(
                "{}Upscale: {} -> {} | {} x{} | device: {}",
                symbols::upscale_start(),
                cmd.source_dir.display(),
                cmd.output_dir.display(),
                cmd.algorithm,
                cmd.scale,
                cli.global.device
            );
            let config = UpscaleConfig::from_args(&cli.global, cmd)
                .unwrap_or_else(|e| fail("Upscale", e));
            finish("Upscale", run_upscale(config));
        }
        Some(Commands::Enhance(cmd)) => {
            info!(
                "{}Enhance: {} -> {} | {} x{} | CLAHE: {} | device: {}",
                symbols::enhance_start(),
                cmd.source_dir.display(),
                cmd.output_dir.display(),
                cmd.algorithm,
                cmd.scale,
                if cmd.no_clahe { "off" } else { "on" },
                cli.global.device
            );
            let config = EnhanceConfig::from_args(&cli.global, cmd)
                .unwrap_or_else(|e| fail("Enhancement", e));
            finish("Enhancement", run_enhancement(config));
        }
        Some(Commands::Detect(cmd)) => {
            info!(
                "{}Detection: {} -> {} | conf: {} | IoU: {} | device: {}",
                symbols::detection_start(),
                cmd.source_dir.display(),
                cmd.output_dir.display(),
                cmd.confidence,
                cmd.iou_threshold,
                cli.global.device
            );
            let config = DetectionConfig::from_args(&cli.global, cmd)
                .unwrap_or_else(|e| fail("Detection", e));
            finish("Detection", run_detection(config));
        }
        Some(Commands::View(cmd)) => {
            let config = ViewConfig::from_args(cmd);
            if let Err(e) = run_view(&config) {
                fail("View", format!("{e:#}"));
            }
        }
        Some(Commands::Version) => {
            println!("nexis v{}", env!("CARGO_PKG_VERSION"));
            println!("ONNX Runtime bindings: ort 2.0");
            println!("Repository: {}", env!("CARGO_PKG_REPOSITORY"));
        }
        None => {
            use clap::CommandFactory;
            let mut cmd = Cli::command();
            if let Err(e) = cmd.print_help() {
                fail("Printing help", e);
            }
        }
    }
}
