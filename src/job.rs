//! One file, one label: decode → rasterize → encode → send.

use std::path::Path;
use std::sync::Arc;

use tracing::{info, instrument};

use crate::config::JobConfig;
use crate::decode::{ImageDecoder, PageDecoder};
use crate::error::Result;
use crate::label::{LabelGeometry, PrinterSettings};
use crate::raster::BitonalBitmap;
use crate::transport::TransportTarget;
use crate::tspl::{self, EncodedJob};

pub struct Pipeline {
    decoder: Arc<dyn PageDecoder>,
    threshold: u8,
}

impl Pipeline {
    pub fn new(decoder: Arc<dyn PageDecoder>, threshold: u8) -> Self {
        Self { decoder, threshold }
    }

    /// Image-file pipeline at the given threshold.
    pub fn images(threshold: u8) -> Self {
        Self::new(Arc::new(ImageDecoder), threshold)
    }

    pub fn decoder(&self) -> &dyn PageDecoder {
        self.decoder.as_ref()
    }

    /// Decode, rasterize and encode without touching any device.
    pub fn render(
        &self,
        path: &Path,
        geometry: &LabelGeometry,
        settings: &PrinterSettings,
    ) -> Result<EncodedJob> {
        geometry.validate()?;
        settings.validate()?;

        let page = self.decoder.decode(
            path,
            geometry.page_index,
            geometry.width_px(),
            geometry.height_px(),
        )?;
        let bitmap = BitonalBitmap::from_page(&page, self.threshold);
        drop(page);
        Ok(tspl::encode(geometry, settings, &bitmap))
    }

    /// Print page `geometry.page_index` of `path` on `target`.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn print_file(
        &self,
        path: &Path,
        geometry: &LabelGeometry,
        settings: &PrinterSettings,
        target: &TransportTarget,
    ) -> Result<()> {
        let job = self.render(path, geometry, settings)?;
        target.send(&job)?;
        info!(bytes = job.len(), "label printed");
        Ok(())
    }
}

/// Something the watch loop can hand a file to.
pub trait JobRunner: Send + Sync + 'static {
    fn run(&self, path: &Path) -> Result<()>;
}

/// A pipeline bound to one resolved configuration.
pub struct FileJob {
    pipeline: Pipeline,
    config: JobConfig,
}

impl FileJob {
    pub fn new(pipeline: Pipeline, config: JobConfig) -> Self {
        Self { pipeline, config }
    }
}

impl JobRunner for FileJob {
    fn run(&self, path: &Path) -> Result<()> {
        self.pipeline.print_file(
            path,
            &self.config.geometry,
            &self.config.settings,
            &self.config.target,
        )
    }
}
