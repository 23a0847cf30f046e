//! Job configuration: a JSON settings snapshot overlaid with explicit values,
//! resolved into geometry, printer settings, threshold and target.

use std::fs;
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, info};

use crate::consts::{DEFAULT_DPI, DEFAULT_THRESHOLD};
use crate::error::{PrintError, Result};
use crate::label::{Direction, LabelGeometry, PrinterSettings};
use crate::transport::TransportTarget;

/// Every configurable value, all optional.
///
/// Used both for the on-disk snapshot and for command-line overrides;
/// [`JobOptions::overlay`] lets the latter win field by field.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JobOptions {
    pub width_mm: Option<f64>,
    pub height_mm: Option<f64>,
    pub page: Option<usize>,
    pub dpi: Option<u32>,
    pub threshold: Option<u8>,

    pub printer: Option<String>,
    pub port: Option<String>,
    pub baud_rate: Option<u32>,

    pub gap_mm: Option<f64>,
    pub gap_offset_mm: Option<f64>,
    pub offset_mm: Option<f64>,
    pub direction: Option<u8>,
    pub speed: Option<u32>,
    pub density: Option<u32>,
    pub tear: Option<bool>,
    pub peel: Option<bool>,
    pub feed_mm: Option<f64>,
}

impl JobOptions {
    /// Read a settings snapshot from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        info!(config_path = %path.display(), "loading settings snapshot");
        let text = fs::read_to_string(path).map_err(|e| {
            PrintError::config(format!("cannot read settings {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&text).map_err(|e| {
            PrintError::config(format!("invalid settings {}: {}", path.display(), e))
        })
    }

    /// Values set in `over` replace ours. Choosing one target kind in
    /// `over` drops the other kind from `self`.
    pub fn overlay(self, over: JobOptions) -> JobOptions {
        let (printer, port) = match (over.printer, over.port) {
            (Some(printer), None) => (Some(printer), None),
            (None, Some(port)) => (None, Some(port)),
            (printer, port) => (printer.or(self.printer), port.or(self.port)),
        };
        JobOptions {
            width_mm: over.width_mm.or(self.width_mm),
            height_mm: over.height_mm.or(self.height_mm),
            page: over.page.or(self.page),
            dpi: over.dpi.or(self.dpi),
            threshold: over.threshold.or(self.threshold),
            printer,
            port,
            baud_rate: over.baud_rate.or(self.baud_rate),
            gap_mm: over.gap_mm.or(self.gap_mm),
            gap_offset_mm: over.gap_offset_mm.or(self.gap_offset_mm),
            offset_mm: over.offset_mm.or(self.offset_mm),
            direction: over.direction.or(self.direction),
            speed: over.speed.or(self.speed),
            density: over.density.or(self.density),
            tear: over.tear.or(self.tear),
            peel: over.peel.or(self.peel),
            feed_mm: over.feed_mm.or(self.feed_mm),
        }
    }

    /// Validate and resolve into a job configuration.
    ///
    /// `query_dpi` is asked for the queue's native resolution only when no
    /// DPI is configured and the target is a queue.
    pub fn resolve<F>(self, query_dpi: F) -> Result<JobConfig>
    where
        F: FnOnce(&str) -> Option<u32>,
    {
        let target = TransportTarget::from_parts(self.printer, self.port, self.baud_rate)?;

        let width_mm = self
            .width_mm
            .ok_or_else(|| PrintError::config("label width (mm) is required"))?;
        let height_mm = self
            .height_mm
            .ok_or_else(|| PrintError::config("label height (mm) is required"))?;

        let direction = match self.direction {
            Some(code) => Some(Direction::from_code(code).ok_or_else(|| {
                PrintError::config(format!("direction must be 0 or 1, got {}", code))
            })?),
            None => None,
        };

        let settings = PrinterSettings {
            gap_mm: self.gap_mm,
            gap_offset_mm: self.gap_offset_mm,
            offset_mm: self.offset_mm,
            direction,
            speed: self.speed,
            density: self.density,
            tear: self.tear.unwrap_or(false),
            peel: self.peel.unwrap_or(false),
            feed_mm: self.feed_mm,
        };
        settings.validate()?;

        let dpi = match (self.dpi, target.queue_name()) {
            (Some(dpi), _) => dpi,
            (None, Some(queue)) => query_dpi(queue).unwrap_or(DEFAULT_DPI),
            (None, None) => DEFAULT_DPI,
        };
        let geometry = LabelGeometry::new(width_mm, height_mm, self.page.unwrap_or(0), dpi)?;

        let config = JobConfig {
            geometry,
            settings,
            threshold: self.threshold.unwrap_or(DEFAULT_THRESHOLD),
            target,
        };
        debug!(?config, "resolved job configuration");
        Ok(config)
    }
}

/// Everything one print job needs, validated.
#[derive(Debug, Clone, PartialEq)]
pub struct JobConfig {
    pub geometry: LabelGeometry,
    pub settings: PrinterSettings,
    pub threshold: u8,
    pub target: TransportTarget,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn base() -> JobOptions {
        JobOptions {
            width_mm: Some(100.0),
            height_mm: Some(150.0),
            printer: Some("Label".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_snapshot_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(
            &path,
            r#"{ "width_mm": 58, "height_mm": 40, "port": "COM3", "baud_rate": 19200,
                 "speed": 4, "tear": true, "direction": 1 }"#,
        )
        .unwrap();

        let options = JobOptions::load(&path).unwrap();
        assert_eq!(options.width_mm, Some(58.0));
        assert_eq!(options.port.as_deref(), Some("COM3"));
        assert_eq!(options.tear, Some(true));
        assert_eq!(options.gap_mm, None);
    }

    #[test]
    fn test_unknown_snapshot_key_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{ "widht_mm": 58 }"#).unwrap();
        assert!(matches!(
            JobOptions::load(&path),
            Err(PrintError::Configuration(_))
        ));
    }

    #[test]
    fn test_overlay_prefers_explicit_values() {
        let snapshot = JobOptions {
            speed: Some(2),
            density: Some(8),
            ..base()
        };
        let cli = JobOptions {
            speed: Some(5),
            ..Default::default()
        };
        let merged = snapshot.overlay(cli);
        assert_eq!(merged.speed, Some(5));
        assert_eq!(merged.density, Some(8));
        assert_eq!(merged.width_mm, Some(100.0));
    }

    #[test]
    fn test_overlay_switches_target_kind() {
        let snapshot = JobOptions {
            printer: None,
            port: Some("/dev/ttyUSB0".into()),
            baud_rate: Some(19200),
            ..base()
        };
        let cli = JobOptions {
            printer: Some("Office Label".into()),
            ..Default::default()
        };
        let config = snapshot.overlay(cli).resolve(|_| None).unwrap();
        assert_eq!(
            config.target,
            TransportTarget::Queue {
                name: "Office Label".into()
            }
        );

        let cli = JobOptions {
            port: Some("COM4".into()),
            ..Default::default()
        };
        let config = base().overlay(cli).resolve(|_| None).unwrap();
        assert_eq!(config.target.queue_name(), None);
    }

    #[test]
    fn test_explicit_dpi_skips_query() {
        let config = JobOptions {
            dpi: Some(300),
            ..base()
        }
        .resolve(|_| panic!("queried despite explicit dpi"))
        .unwrap();
        assert_eq!(config.geometry.dpi, 300);
    }

    #[test]
    fn test_queue_dpi_then_default() {
        let config = base().resolve(|q| (q == "Label").then_some(300)).unwrap();
        assert_eq!(config.geometry.dpi, 300);

        let config = base().resolve(|_| None).unwrap();
        assert_eq!(config.geometry.dpi, 203);
        assert_eq!(config.threshold, 180);
        assert_eq!(config.geometry.width_px(), 800);
        assert_eq!(config.geometry.height_px(), 1200);
    }

    #[test]
    fn test_serial_target_uses_default_dpi() {
        let config = JobOptions {
            printer: None,
            port: Some("/dev/ttyUSB0".into()),
            ..base()
        }
        .resolve(|_| panic!("serial targets have no queue to query"))
        .unwrap();
        assert_eq!(config.geometry.dpi, 203);
    }

    #[test]
    fn test_missing_size_is_configuration_error() {
        let options = JobOptions {
            height_mm: None,
            ..base()
        };
        assert!(matches!(
            options.resolve(|_| None),
            Err(PrintError::Configuration(_))
        ));
    }

    #[test]
    fn test_bad_direction_rejected() {
        let options = JobOptions {
            direction: Some(2),
            ..base()
        };
        assert!(options.resolve(|_| None).is_err());
    }

    #[test]
    fn test_conflicting_targets_fail_before_dpi_query() {
        let options = JobOptions {
            port: Some("COM3".into()),
            ..base()
        };
        assert!(matches!(
            options.resolve(|_| panic!("no device I/O on bad configuration")),
            Err(PrintError::Configuration(_))
        ));
    }
}
