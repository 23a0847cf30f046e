//! # tspl-print
//!
//! ```bash
//! # One label, straight to a queue
//! tspl-print print --printer "Label Printer" --width-mm 100 --height-mm 150 label.png
//!
//! # Serial printer, settings from a snapshot file
//! tspl-print print --config settings.json --port /dev/ttyUSB0 --baud 115200 label.png
//!
//! # Print everything dropped into a folder until Ctrl-C
//! tspl-print watch --config settings.json ./inbox
//!
//! # Installed queues and serial ports
//! tspl-print list
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;

use tspl_label_printer::{
    discovery, FileJob, JobConfig, JobOptions, Pipeline, PrintError, WatchEngine, WatchOptions,
};

/// Render images to TSPL and send them to a label printer
#[derive(Parser, Debug)]
#[command(name = "tspl-print")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print one file
    Print {
        /// Image to print
        file: PathBuf,

        #[command(flatten)]
        job: JobArgs,
    },

    /// Print every file dropped into a folder
    Watch {
        /// Folder to watch
        folder: PathBuf,

        /// File extensions to pick up (defaults to supported image types)
        #[arg(long = "ext", value_delimiter = ',')]
        extensions: Vec<String>,

        #[command(flatten)]
        job: JobArgs,
    },

    /// List print queues and serial ports
    List,
}

#[derive(Args, Debug)]
struct JobArgs {
    /// JSON settings snapshot; flags below override its values
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Label width in millimetres
    #[arg(long)]
    width_mm: Option<f64>,

    /// Label height in millimetres
    #[arg(long)]
    height_mm: Option<f64>,

    /// Zero-based page to print
    #[arg(long)]
    page: Option<usize>,

    /// Resolution (defaults to the queue's native DPI, then 203)
    #[arg(long)]
    dpi: Option<u32>,

    /// Luminance below this prints black (0-255, default 180)
    #[arg(long)]
    threshold: Option<u8>,

    /// Print queue name
    #[arg(long, conflicts_with = "port")]
    printer: Option<String>,

    /// Serial device (e.g. /dev/ttyUSB0, COM3)
    #[arg(long)]
    port: Option<String>,

    /// Serial baud rate (default 9600)
    #[arg(long)]
    baud: Option<u32>,

    #[arg(long)]
    gap_mm: Option<f64>,

    #[arg(long)]
    gap_offset_mm: Option<f64>,

    #[arg(long)]
    offset_mm: Option<f64>,

    /// Print direction, 0 or 1
    #[arg(long)]
    direction: Option<u8>,

    #[arg(long)]
    speed: Option<u32>,

    #[arg(long)]
    density: Option<u32>,

    /// Enable tear-off mode
    #[arg(long)]
    tear: bool,

    /// Enable peel-off mode
    #[arg(long)]
    peel: bool,

    /// Feed after printing, in millimetres
    #[arg(long)]
    feed_mm: Option<f64>,
}

impl JobArgs {
    fn resolve(self) -> Result<JobConfig, PrintError> {
        let snapshot = match &self.config {
            Some(path) => JobOptions::load(path)?,
            None => JobOptions::default(),
        };
        let flags = JobOptions {
            width_mm: self.width_mm,
            height_mm: self.height_mm,
            page: self.page,
            dpi: self.dpi,
            threshold: self.threshold,
            printer: self.printer,
            port: self.port,
            baud_rate: self.baud,
            gap_mm: self.gap_mm,
            gap_offset_mm: self.gap_offset_mm,
            offset_mm: self.offset_mm,
            direction: self.direction,
            speed: self.speed,
            density: self.density,
            tear: self.tear.then_some(true),
            peel: self.peel.then_some(true),
            feed_mm: self.feed_mm,
        };
        snapshot.overlay(flags).resolve(discovery::native_dpi)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), PrintError> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Print { file, job } => {
            let config = job.resolve()?;
            Pipeline::images(config.threshold).print_file(
                &file,
                &config.geometry,
                &config.settings,
                &config.target,
            )?;
            println!("Printed {}", file.display());
            Ok(())
        }

        Commands::Watch {
            folder,
            extensions,
            job,
        } => {
            let config = job.resolve()?;
            let pipeline = Pipeline::images(config.threshold);
            let options = if extensions.is_empty() {
                WatchOptions::new(&folder, pipeline.decoder().extensions())
            } else {
                WatchOptions::new(&folder, &extensions[..])
            };
            info!(
                folder = %folder.display(),
                destination = %config.target,
                dpi = config.geometry.dpi,
                "starting watch"
            );
            let mut engine = WatchEngine::new(options, Arc::new(FileJob::new(pipeline, config)));

            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("interrupt received, stopping");
                    on_interrupt.cancel();
                }
            });

            println!("Watching {} (Ctrl-C to stop)", folder.display());
            let summary = engine.run(cancel).await?;
            println!(
                "Stopped: {} printed, {} moved to errors",
                summary.printed, summary.quarantined
            );
            Ok(())
        }

        Commands::List => {
            println!("Print queues:");
            match discovery::list_queues() {
                Ok(queues) if queues.is_empty() => println!("  (none)"),
                Ok(queues) => {
                    for queue in queues {
                        match discovery::native_dpi(&queue) {
                            Some(dpi) => println!("  {} ({} dpi)", queue, dpi),
                            None => println!("  {}", queue),
                        }
                    }
                }
                Err(e) => println!("  unavailable: {}", e),
            }

            println!("\nSerial ports:");
            let ports = discovery::list_serial_ports();
            if ports.is_empty() {
                println!("  (none)");
            }
            for port in ports {
                println!("  {}", port);
            }
            Ok(())
        }
    }
}
