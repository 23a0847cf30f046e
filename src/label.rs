//! Label geometry and printer settings, the value data threaded through a job.

use crate::consts::{MAX_LABEL_DOTS, MM_PER_INCH};
use crate::error::{PrintError, Result};

/// Physical label size, page selection and resolution.
///
/// `dpi` is resolved once (explicit value, queue capability or default)
/// before the geometry is built and never changes during a job.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LabelGeometry {
    pub width_mm: f64,
    pub height_mm: f64,
    pub page_index: usize,
    pub dpi: u32,
}

impl LabelGeometry {
    pub fn new(width_mm: f64, height_mm: f64, page_index: usize, dpi: u32) -> Result<Self> {
        let geometry = Self {
            width_mm,
            height_mm,
            page_index,
            dpi,
        };
        geometry.validate()?;
        Ok(geometry)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.width_mm.is_finite() && self.width_mm > 0.0) {
            return Err(PrintError::config(format!(
                "label width must be a positive number of millimetres, got {}",
                self.width_mm
            )));
        }
        if !(self.height_mm.is_finite() && self.height_mm > 0.0) {
            return Err(PrintError::config(format!(
                "label height must be a positive number of millimetres, got {}",
                self.height_mm
            )));
        }
        if self.dpi == 0 {
            return Err(PrintError::config("resolution must be a positive DPI"));
        }
        let dpmm = self.dots_per_mm();
        let (width_dots, height_dots) = (self.width_mm * dpmm, self.height_mm * dpmm);
        let limit = MAX_LABEL_DOTS as f64;
        if width_dots.round() > limit || height_dots.round() > limit {
            return Err(PrintError::config(format!(
                "label {}x{} mm at {} dpi exceeds {} dots per side",
                self.width_mm, self.height_mm, self.dpi, MAX_LABEL_DOTS
            )));
        }
        if self.width_px() == 0 || self.height_px() == 0 {
            return Err(PrintError::config(format!(
                "label {}x{} mm is smaller than one dot at {} dpi",
                self.width_mm, self.height_mm, self.dpi
            )));
        }
        Ok(())
    }

    /// Whole dots per millimetre; 203 dpi heads print 8 dots/mm.
    pub fn dots_per_mm(&self) -> f64 {
        (self.dpi as f64 / MM_PER_INCH).round()
    }

    pub fn width_px(&self) -> u32 {
        (self.width_mm * self.dots_per_mm()).round() as u32
    }

    pub fn height_px(&self) -> u32 {
        (self.height_mm * self.dots_per_mm()).round() as u32
    }
}

/// Print direction as understood by the `DIRECTION` directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Reverse,
}

impl Direction {
    pub fn code(self) -> u8 {
        match self {
            Direction::Forward => 0,
            Direction::Reverse => 1,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Direction::Forward),
            1 => Some(Direction::Reverse),
            _ => None,
        }
    }
}

/// Optional printer-side configuration.
///
/// Every `None` is left out of the encoded job: the printer keeps whatever
/// value it was last configured with.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PrinterSettings {
    pub gap_mm: Option<f64>,
    pub gap_offset_mm: Option<f64>,
    pub offset_mm: Option<f64>,
    pub direction: Option<Direction>,
    pub speed: Option<u32>,
    pub density: Option<u32>,
    pub tear: bool,
    pub peel: bool,
    pub feed_mm: Option<f64>,
}

impl PrinterSettings {
    pub fn validate(&self) -> Result<()> {
        let lengths = [
            ("gap", self.gap_mm),
            ("gap offset", self.gap_offset_mm),
            ("offset", self.offset_mm),
            ("feed", self.feed_mm),
        ];
        for (name, value) in lengths {
            if let Some(mm) = value {
                if !(mm.is_finite() && mm >= 0.0) {
                    return Err(PrintError::config(format!(
                        "{name} must be a non-negative number of millimetres, got {mm}"
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn has_gap(&self) -> bool {
        self.gap_mm.is_some() || self.gap_offset_mm.is_some()
    }
}
