use tracing::debug;

use crate::label::{LabelGeometry, PrinterSettings};
use crate::raster::BitonalBitmap;

/// Finished command stream, ready for any transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedJob(Vec<u8>);

impl EncodedJob {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Helper to append a TSPL ASCII command line terminated with CRLF
pub fn tspl_line(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(s.as_bytes());
    buf.extend_from_slice(b"\r\n");
}

/// Whole millimetres as the printer firmware parses them: truncated, not rounded.
fn mm(value: f64) -> i64 {
    value.trunc() as i64
}

/// Encode one label: header directives, inverted raster, `PRINT 1,1`.
///
/// Panics if the bitmap does not match the geometry's pixel size; callers
/// build the bitmap from that same geometry.
pub fn encode(
    geometry: &LabelGeometry,
    settings: &PrinterSettings,
    bitmap: &BitonalBitmap,
) -> EncodedJob {
    assert_eq!(
        (bitmap.width(), bitmap.height()),
        (geometry.width_px(), geometry.height_px()),
        "bitmap size does not match label geometry"
    );

    let raster = bitmap.as_bytes();
    let mut buf = Vec::with_capacity(raster.len() + 256);

    tspl_line(
        &mut buf,
        &format!("SIZE {} mm,{} mm", mm(geometry.width_mm), mm(geometry.height_mm)),
    );
    if settings.has_gap() {
        tspl_line(
            &mut buf,
            &format!(
                "GAP {} mm,{} mm",
                mm(settings.gap_mm.unwrap_or(0.0)),
                mm(settings.gap_offset_mm.unwrap_or(0.0))
            ),
        );
    }
    if let Some(offset) = settings.offset_mm {
        tspl_line(&mut buf, &format!("OFFSET {} mm", mm(offset)));
    }
    if let Some(direction) = settings.direction {
        tspl_line(&mut buf, &format!("DIRECTION {}", direction.code()));
    }
    if let Some(speed) = settings.speed {
        tspl_line(&mut buf, &format!("SPEED {}", speed));
    }
    if let Some(density) = settings.density {
        tspl_line(&mut buf, &format!("DENSITY {}", density));
    }
    if settings.tear {
        tspl_line(&mut buf, "SET TEAR ON");
    }
    if settings.peel {
        tspl_line(&mut buf, "SET PEEL ON");
    }
    if let Some(feed) = settings.feed_mm {
        tspl_line(&mut buf, &format!("FEED {} mm", mm(feed)));
    }
    tspl_line(&mut buf, "CLS");

    // BITMAP header runs straight into the binary rows, no line break
    let header = format!(
        "BITMAP 0,0,{},{},0,",
        bitmap.row_bytes(),
        bitmap.height()
    );
    buf.extend_from_slice(header.as_bytes());

    // Wire polarity: 0 = burn. Flip bits → black where the bitmap has ink.
    buf.extend(raster.iter().map(|b| !b));

    buf.extend_from_slice(b"\r\n");
    tspl_line(&mut buf, "PRINT 1,1");

    debug!(
        row_bytes = bitmap.row_bytes(),
        rows = bitmap.height(),
        bytes = buf.len(),
        "encoded TSPL job"
    );
    EncodedJob(buf)
}
