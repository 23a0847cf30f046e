use std::time::Duration;

// Rasterization and label defaults
pub const DEFAULT_THRESHOLD: u8 = 180;   // luminance below this is ink
pub const DEFAULT_DPI: u32 = 203;        // 8 dots/mm, the common label-printer head
pub const MM_PER_INCH: f64 = 25.4;
pub const MAX_LABEL_DOTS: u32 = u16::MAX as u32; // per side

// Serial framing defaults (8N1, no flow control is fixed)
pub const DEFAULT_BAUD: u32 = 9600;
pub const SERIAL_WRITE_TIMEOUT: Duration = Duration::from_secs(30);

// Spooler document name and datatype
pub const JOB_TITLE: &str = "TSPL Label";
pub const RAW_DATATYPE: &str = "RAW";

// Watch-folder timings
pub const SETTLE_DELAY: Duration = Duration::from_millis(800);
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const ERRORS_DIR: &str = "errors";

/// Extensions picked up by the watch folder when none are configured.
pub const DEFAULT_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "bmp", "gif", "tif", "tiff", "webp",
];
