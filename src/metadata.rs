use crate::errors::Error;
use crate::Mode;

/// Capability contract of a device metadata reader.
///
/// The source is opaque: it may read an instrument file header or shell out
/// to an acquisition daemon. Failures surface as
/// [`Error::ExternalCollaborator`] or whatever the implementation raises; the
/// core never retries them.
pub trait DeviceMetadataSource {
    fn mode(&self) -> Result<Mode, Error>;
    /// Device resolution in ticks per unit.
    fn resolution(&self) -> Result<f64, Error>;
    /// Laser repetition rate in Hz. Only meaningful for t3 acquisitions.
    fn repetition_rate(&self) -> Result<f64, Error>;
    /// Total acquisition time in seconds.
    fn integration_time(&self) -> Result<f64, Error>;
    /// Channel count as reported by the device, before any probing.
    fn channel_count(&self) -> Result<usize, Error>;
}

/// Raw acquisition metadata, fetched lazily and memoized per resolver
/// instance. Each field is filled on first access and never refetched.
#[derive(Debug, Clone, Default)]
pub(crate) struct AcquisitionMetadata {
    mode: Option<Mode>,
    resolution: Option<f64>,
    repetition_rate: Option<f64>,
    integration_time: Option<f64>,
    channel_count: Option<usize>,
}

impl AcquisitionMetadata {
    pub fn mode(&mut self, source: &dyn DeviceMetadataSource) -> Result<Mode, Error> {
        if let Some(mode) = self.mode {
            return Ok(mode);
        }
        let mode = source.mode()?;
        self.mode = Some(mode);
        Ok(mode)
    }

    pub fn resolution(&mut self, source: &dyn DeviceMetadataSource) -> Result<f64, Error> {
        if let Some(resolution) = self.resolution {
            return Ok(resolution);
        }
        let resolution = source.resolution()?;
        self.resolution = Some(resolution);
        Ok(resolution)
    }

    pub fn repetition_rate(&mut self, source: &dyn DeviceMetadataSource) -> Result<f64, Error> {
        if let Some(rate) = self.repetition_rate {
            return Ok(rate);
        }
        let rate = source.repetition_rate()?;
        self.repetition_rate = Some(rate);
        Ok(rate)
    }

    pub fn integration_time(&mut self, source: &dyn DeviceMetadataSource) -> Result<f64, Error> {
        if let Some(time) = self.integration_time {
            return Ok(time);
        }
        let time = source.integration_time()?;
        self.integration_time = Some(time);
        Ok(time)
    }

    pub fn channel_count(&mut self, source: &dyn DeviceMetadataSource) -> Result<usize, Error> {
        if let Some(channels) = self.channel_count {
            return Ok(channels);
        }
        let channels = source.channel_count()?;
        self.channel_count = Some(channels);
        Ok(channels)
    }
}
