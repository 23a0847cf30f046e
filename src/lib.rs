//! Self-contained TSPL label printing pipeline.
//! - Classifies a rendered page into a tight 1-bit bitmap (BT.601 threshold)
//! - Encodes SIZE/GAP/.../BITMAP/PRINT with inverted raster polarity
//! - Sends RAW jobs through the OS spooler or straight to a serial port
//! - Watches a folder: print and delete, or quarantine into `errors/`
//!
//! ```no_run
//! use std::path::Path;
//! use tspl_label_printer::{JobOptions, Pipeline};
//!
//! let config = JobOptions {
//!     width_mm: Some(100.0),
//!     height_mm: Some(150.0),
//!     printer: Some("Label Printer".into()),
//!     ..Default::default()
//! }
//! .resolve(tspl_label_printer::discovery::native_dpi)?;
//!
//! Pipeline::images(config.threshold).print_file(
//!     Path::new("shipping.png"),
//!     &config.geometry,
//!     &config.settings,
//!     &config.target,
//! )?;
//! # Ok::<(), tspl_label_printer::PrintError>(())
//! ```

pub mod config;
pub mod consts;
pub mod decode;
pub mod discovery;
pub mod error;
pub mod job;
pub mod label;
pub mod printer;
pub mod raster;
pub mod serial;
pub mod transport;
pub mod tspl;
pub mod watch;

pub use config::{JobConfig, JobOptions};
pub use decode::{DecodedPage, ImageDecoder, PageDecoder};
pub use error::{PrintError, TransportError};
pub use job::{FileJob, JobRunner, Pipeline};
pub use label::{Direction, LabelGeometry, PrinterSettings};
pub use raster::BitonalBitmap;
pub use transport::TransportTarget;
pub use tspl::{encode, EncodedJob};
pub use watch::{WatchEngine, WatchOptions, WatchSummary};
