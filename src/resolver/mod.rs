pub mod binning;

use std::io::Read;

use log::{debug, info};

use crate::errors::Error;
use crate::intensity_tools::trace::IntensityTrace;
use crate::limits::Limits;
use crate::metadata::{AcquisitionMetadata, DeviceMetadataSource};
use crate::{CorrelationEngine, Mode, RawIntensityProducer};

/// Bin width, in device ticks, used for the channel-count detection probe.
const PROBE_BIN_WIDTH: f64 = 50_000.0;

const DEFAULT_T2_BIN_WIDTH: f64 = 5e10;
const DEFAULT_THRESHOLD_MAX: f64 = 1_000_000.0;

/// One lazily derived configuration field.
///
/// A getter fills an `Unset` slot with a `Derived` value; an explicit setter
/// pins it. There is deliberately no way to clear a slot: once a value is in,
/// later metadata changes never re-derive it.
#[derive(Debug, Clone)]
enum Slot<T> {
    Unset,
    Derived(T),
    Pinned(T),
}

impl<T> Slot<T> {
    fn value(&self) -> Option<&T> {
        match self {
            Slot::Unset => None,
            Slot::Derived(value) | Slot::Pinned(value) => Some(value),
        }
    }

    fn cache(&mut self, value: T) {
        if let Slot::Unset = self {
            *self = Slot::Derived(value);
        }
    }

    fn pin(&mut self, value: T) {
        *self = Slot::Pinned(value);
    }
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Slot::Unset
    }
}

/// Parameters for assembling a correlation request. Every field falls back
/// to the resolver's derived defaults when left unset.
#[derive(Debug, Clone, Default)]
pub struct CorrelationParams {
    pub mode: Option<Mode>,
    pub order: Option<u32>,
    pub time_bins: Option<Limits>,
    pub pulse_bins: Option<Limits>,
    pub time_bin_width: Option<f64>,
    pub channels: Option<usize>,
}

/// A fully resolved correlation-engine invocation. Once built, nothing in it
/// is renegotiated; any resolution failure happens before this exists.
#[derive(Debug, Clone)]
pub struct CorrelationRequest {
    pub mode: Mode,
    pub order: u32,
    pub time_bins: Limits,
    pub pulse_bins: Option<Limits>,
    pub channel_count: usize,
}

/// Lazily derives and memoizes the analysis configuration for one
/// acquisition.
///
/// Raw metadata is fetched from the source once per field and cached for the
/// resolver's lifetime. Each configuration field is independently pinnable
/// through its setter; a pinned field is never re-derived, even if `set_mode`
/// changes the mode afterwards.
pub struct ParameterResolver<S: DeviceMetadataSource> {
    source: S,
    producer: Option<Box<dyn RawIntensityProducer>>,
    meta: AcquisitionMetadata,
    mode: Slot<Mode>,
    channel_count: Slot<usize>,
    bin_width: Slot<f64>,
    threshold_min: Slot<f64>,
    threshold_max: Slot<f64>,
    order: Slot<u32>,
    time_bins: Slot<Option<Limits>>,
}

impl<S: DeviceMetadataSource> ParameterResolver<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            producer: None,
            meta: AcquisitionMetadata::default(),
            mode: Slot::default(),
            channel_count: Slot::default(),
            bin_width: Slot::default(),
            threshold_min: Slot::default(),
            threshold_max: Slot::default(),
            order: Slot::default(),
            time_bins: Slot::default(),
        }
    }

    /// Attach an intensity producer, enabling the channel-count probe for
    /// sources that do not report exactly two channels.
    pub fn with_producer(source: S, producer: Box<dyn RawIntensityProducer>) -> Self {
        let mut resolver = Self::new(source);
        resolver.producer = Some(producer);
        resolver
    }

    pub fn mode(&mut self) -> Result<Mode, Error> {
        if let Some(&mode) = self.mode.value() {
            return Ok(mode);
        }
        let mode = self.meta.mode(&self.source)?;
        self.mode.cache(mode);
        Ok(mode)
    }

    pub fn set_mode(&mut self, mode: Mode) {
        self.mode.pin(mode);
    }

    pub fn resolution(&mut self) -> Result<f64, Error> {
        self.meta.resolution(&self.source)
    }

    pub fn repetition_rate(&mut self) -> Result<f64, Error> {
        self.meta.repetition_rate(&self.source)
    }

    pub fn integration_time(&mut self) -> Result<f64, Error> {
        self.meta.integration_time(&self.source)
    }

    /// Channel count of the acquisition.
    ///
    /// A source reporting exactly two channels is taken at its word; anything
    /// else is probed with a count-all intensity pass, counting the channels
    /// that show any activity on top of an empirical base offset (0 for t2,
    /// 1 for t3).
    pub fn channel_count(&mut self) -> Result<usize, Error> {
        if let Some(&channels) = self.channel_count.value() {
            return Ok(channels);
        }
        let reported = self.meta.channel_count(&self.source)?;
        let channels = if reported == 2 {
            2
        } else {
            self.probe_channel_count(reported)?
        };
        self.channel_count.cache(channels);
        Ok(channels)
    }

    pub fn set_channel_count(&mut self, channels: usize) {
        self.channel_count.pin(channels);
    }

    fn probe_channel_count(&mut self, reported: usize) -> Result<usize, Error> {
        let mode = self.mode()?;
        debug!("probing active channels ({} reported)", reported);
        let producer = self.producer.as_ref().ok_or_else(|| {
            Error::ExternalCollaborator(
                "no intensity producer available for the channel probe".to_string(),
            )
        })?;
        let stream = producer.intensity(PROBE_BIN_WIDTH, reported, true)?;
        let trace = IntensityTrace::from_reader(stream, Some(mode))?;

        // Empirical base correction, not a derived quantity.
        let base = match mode {
            Mode::T2 => 0,
            Mode::T3 => 1,
        };
        let active = (0..trace.channel_count())
            .filter(|&channel| trace.channel(channel).iter().any(|&count| count != 0.0))
            .count();
        Ok(base + active)
    }

    /// Analysis bin width in stored device units: picosecond ticks for t2,
    /// pulses for t3.
    pub fn bin_width(&mut self) -> Result<f64, Error> {
        if let Some(&width) = self.bin_width.value() {
            return Ok(width);
        }
        let width = match self.mode()? {
            Mode::T2 => DEFAULT_T2_BIN_WIDTH,
            Mode::T3 => (self.repetition_rate()? * 0.05).round(),
        };
        self.bin_width.cache(width);
        Ok(width)
    }

    /// Pin the bin width from a value in seconds, converted to the stored
    /// device units of the current mode.
    pub fn set_bin_width(&mut self, seconds: f64) -> Result<(), Error> {
        let width = match self.mode()? {
            Mode::T2 => seconds,
            Mode::T3 => (seconds * self.repetition_rate()? / 1e12).round(),
        };
        self.bin_width.pin(width);
        Ok(())
    }

    pub fn threshold_min(&mut self) -> f64 {
        if let Some(&threshold) = self.threshold_min.value() {
            return threshold;
        }
        self.threshold_min.cache(0.0);
        0.0
    }

    pub fn threshold_max(&mut self) -> f64 {
        if let Some(&threshold) = self.threshold_max.value() {
            return threshold;
        }
        self.threshold_max.cache(DEFAULT_THRESHOLD_MAX);
        DEFAULT_THRESHOLD_MAX
    }

    /// Pin the minimum intensity threshold from a unitless multiplier of the
    /// bin width.
    pub fn set_threshold_min(&mut self, multiplier: f64) -> Result<(), Error> {
        let threshold = self.resolve_threshold(multiplier)?;
        self.threshold_min.pin(threshold);
        Ok(())
    }

    /// Pin the maximum intensity threshold from a unitless multiplier of the
    /// bin width.
    pub fn set_threshold_max(&mut self, multiplier: f64) -> Result<(), Error> {
        let threshold = self.resolve_threshold(multiplier)?;
        self.threshold_max.pin(threshold);
        Ok(())
    }

    fn resolve_threshold(&mut self, multiplier: f64) -> Result<f64, Error> {
        let unit = match self.mode()? {
            Mode::T2 => 1e-12,
            Mode::T3 => 1.0 / self.repetition_rate()?,
        };
        Ok(multiplier * self.bin_width()? * unit)
    }

    /// Correlation order: g(2) by default for t2, g(1) (lifetime) for t3.
    pub fn order(&mut self) -> Result<u32, Error> {
        if let Some(&order) = self.order.value() {
            return Ok(order);
        }
        let order = match self.mode()? {
            Mode::T2 => 2,
            Mode::T3 => 1,
        };
        self.order.cache(order);
        Ok(order)
    }

    pub fn set_order(&mut self, order: u32) {
        self.order.pin(order);
    }

    /// Time-bin grid handed to the engine. Defaults to a fixed symmetric
    /// grid only for order 2; for other orders the engine derives its own.
    pub fn time_bins(&mut self) -> Result<Option<Limits>, Error> {
        if let Some(&limits) = self.time_bins.value() {
            return Ok(limits);
        }
        let limits = if self.order()? == 2 {
            Some(Limits::new(-1e6, 1e6, 2000))
        } else {
            None
        };
        self.time_bins.cache(limits);
        Ok(limits)
    }

    pub fn set_time_bins(&mut self, limits: Option<Limits>) {
        self.time_bins.pin(limits);
    }

    /// Resolve everything a correlation invocation needs.
    ///
    /// A t3 acquisition may be requested as t2 (down-conversion); requesting
    /// a t2 acquisition as t3 fails with
    /// [`Error::UnsupportedModeConversion`] before anything is assembled.
    pub fn correlation_request(
        &mut self,
        params: &CorrelationParams,
    ) -> Result<CorrelationRequest, Error> {
        let photon_mode = self.mode()?;
        let requested = params.mode.unwrap_or(photon_mode);
        if requested == Mode::T3 && photon_mode == Mode::T2 {
            return Err(Error::UnsupportedModeConversion {
                from: photon_mode,
                to: requested,
            });
        }

        let order = match params.order {
            Some(order) => order,
            None => self.order()?,
        };
        info!("resolving g{} request in {} mode", order, requested);

        let repetition_rate = if photon_mode == Mode::T3 {
            self.repetition_rate()?
        } else {
            binning::DEFAULT_REPETITION_RATE
        };
        let time_bin_width = params
            .time_bin_width
            .unwrap_or(binning::DEFAULT_TIME_BIN_WIDTH);

        let time_bins = match params.time_bins {
            Some(limits) => limits,
            None => {
                let resolution = if requested == Mode::T3 && order == 1 {
                    self.resolution()?
                } else {
                    0.0
                };
                binning::time_bins_for(requested, order, resolution, repetition_rate, time_bin_width)?
            }
        };

        let pulse_bins = if requested == Mode::T3 && order > 1 {
            Some(params.pulse_bins.unwrap_or_else(binning::default_pulse_bins))
        } else {
            None
        };

        let channel_count = match params.channels {
            Some(channels) => channels,
            None => self.channel_count()?,
        };

        Ok(CorrelationRequest {
            mode: requested,
            order,
            time_bins,
            pulse_bins,
            channel_count,
        })
    }

    /// Resolve parameters, then hand the request and the raw event stream to
    /// the engine. Resolution completes (or fails) before the engine is
    /// touched.
    pub fn correlate<E: CorrelationEngine + ?Sized>(
        &mut self,
        engine: &E,
        params: &CorrelationParams,
        events: &mut dyn Read,
    ) -> Result<Box<dyn Read>, Error> {
        let request = self.correlation_request(params)?;
        engine.correlate(&request, events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::cell::RefCell;
    use std::io::Cursor;

    struct FakeSource {
        mode: Mode,
        resolution: f64,
        repetition_rate: f64,
        channels: usize,
        mode_fetches: RefCell<usize>,
    }

    impl FakeSource {
        fn new(mode: Mode) -> Self {
            Self {
                mode,
                resolution: 16.0,
                repetition_rate: 5_000_000.0,
                channels: 2,
                mode_fetches: RefCell::new(0),
            }
        }
    }

    impl DeviceMetadataSource for FakeSource {
        fn mode(&self) -> Result<Mode, Error> {
            *self.mode_fetches.borrow_mut() += 1;
            Ok(self.mode)
        }

        fn resolution(&self) -> Result<f64, Error> {
            Ok(self.resolution)
        }

        fn repetition_rate(&self) -> Result<f64, Error> {
            Ok(self.repetition_rate)
        }

        fn integration_time(&self) -> Result<f64, Error> {
            Ok(60.0)
        }

        fn channel_count(&self) -> Result<usize, Error> {
            Ok(self.channels)
        }
    }

    struct FakeProducer(&'static str);

    impl RawIntensityProducer for FakeProducer {
        fn intensity(
            &self,
            _bin_width: f64,
            _channels: usize,
            _count_all: bool,
        ) -> Result<Box<dyn Read>, Error> {
            Ok(Box::new(Cursor::new(self.0.as_bytes().to_vec())))
        }
    }

    #[test]
    fn metadata_is_fetched_once() {
        let mut resolver = ParameterResolver::new(FakeSource::new(Mode::T3));
        resolver.mode().unwrap();
        resolver.mode().unwrap();
        resolver.order().unwrap();
        assert_eq!(*resolver.source.mode_fetches.borrow(), 1);
        assert_relative_eq!(resolver.integration_time().unwrap(), 60.0);
        assert_relative_eq!(resolver.resolution().unwrap(), 16.0);
    }

    #[test]
    fn default_bin_widths_follow_mode() {
        let mut t3 = ParameterResolver::new(FakeSource::new(Mode::T3));
        assert_relative_eq!(t3.bin_width().unwrap(), 250_000.0);

        let mut t2 = ParameterResolver::new(FakeSource::new(Mode::T2));
        assert_relative_eq!(t2.bin_width().unwrap(), 5e10);
    }

    #[test]
    fn set_bin_width_converts_seconds_to_device_units() {
        let mut t3 = ParameterResolver::new(FakeSource::new(Mode::T3));
        t3.set_bin_width(1e8).unwrap();
        assert_relative_eq!(t3.bin_width().unwrap(), 500.0);

        let mut t2 = ParameterResolver::new(FakeSource::new(Mode::T2));
        t2.set_bin_width(25_000.0).unwrap();
        assert_relative_eq!(t2.bin_width().unwrap(), 25_000.0);
    }

    #[test]
    fn threshold_defaults_and_resolution() {
        let mut resolver = ParameterResolver::new(FakeSource::new(Mode::T2));
        assert_relative_eq!(resolver.threshold_min(), 0.0);
        assert_relative_eq!(resolver.threshold_max(), 1_000_000.0);

        resolver.set_threshold_min(2.0).unwrap();
        // 2 x 5e10 ticks x 1e-12 s/tick.
        assert_relative_eq!(resolver.threshold_min(), 0.1);

        let mut t3 = ParameterResolver::new(FakeSource::new(Mode::T3));
        t3.set_threshold_max(1.0).unwrap();
        // 250_000 pulses / 5e6 Hz.
        assert_relative_eq!(t3.threshold_max(), 0.05);
    }

    #[test]
    fn order_defaults_follow_mode() {
        let mut t2 = ParameterResolver::new(FakeSource::new(Mode::T2));
        assert_eq!(t2.order().unwrap(), 2);

        let mut t3 = ParameterResolver::new(FakeSource::new(Mode::T3));
        assert_eq!(t3.order().unwrap(), 1);
    }

    #[test]
    fn time_bins_default_only_for_order_two() {
        let mut t2 = ParameterResolver::new(FakeSource::new(Mode::T2));
        assert_eq!(
            t2.time_bins().unwrap(),
            Some(Limits::new(-1e6, 1e6, 2000))
        );

        let mut t3 = ParameterResolver::new(FakeSource::new(Mode::T3));
        assert_eq!(t3.time_bins().unwrap(), None);

        let mut pinned = ParameterResolver::new(FakeSource::new(Mode::T2));
        pinned.set_order(3);
        assert_eq!(pinned.time_bins().unwrap(), None);
    }

    #[test]
    fn pinned_fields_survive_mode_changes() {
        let mut resolver = ParameterResolver::new(FakeSource::new(Mode::T3));
        assert_relative_eq!(resolver.bin_width().unwrap(), 250_000.0);

        // No auto-invalidation: the cached t3 width stays after the mode flips.
        resolver.set_mode(Mode::T2);
        assert_eq!(resolver.mode().unwrap(), Mode::T2);
        assert_relative_eq!(resolver.bin_width().unwrap(), 250_000.0);
    }

    #[test]
    fn two_reported_channels_are_trusted() {
        let mut resolver = ParameterResolver::new(FakeSource::new(Mode::T3));
        assert_eq!(resolver.channel_count().unwrap(), 2);
    }

    #[test]
    fn channel_probe_counts_active_channels_plus_base_offset() {
        let mut source = FakeSource::new(Mode::T3);
        source.channels = 4;
        let producer = FakeProducer("0,100,0,4,0,2\n100,200,0,1,0,0\n");
        let mut resolver = ParameterResolver::with_producer(source, Box::new(producer));
        // Channels 1 and 3 active, plus the t3 base offset of 1.
        assert_eq!(resolver.channel_count().unwrap(), 3);

        let mut source = FakeSource::new(Mode::T2);
        source.channels = 4;
        let producer = FakeProducer("0,100,3,0,0,2\n");
        let mut resolver = ParameterResolver::with_producer(source, Box::new(producer));
        // Channels 0 and 3 active, t2 base offset of 0.
        assert_eq!(resolver.channel_count().unwrap(), 2);
    }

    #[test]
    fn probe_without_producer_fails() {
        let mut source = FakeSource::new(Mode::T3);
        source.channels = 4;
        let mut resolver = ParameterResolver::new(source);
        assert!(matches!(
            resolver.channel_count(),
            Err(Error::ExternalCollaborator(_))
        ));
    }

    #[test]
    fn t2_acquisition_cannot_be_requested_as_t3() {
        let mut resolver = ParameterResolver::new(FakeSource::new(Mode::T2));
        let params = CorrelationParams {
            mode: Some(Mode::T3),
            ..CorrelationParams::default()
        };
        assert!(matches!(
            resolver.correlation_request(&params),
            Err(Error::UnsupportedModeConversion {
                from: Mode::T2,
                to: Mode::T3,
            })
        ));
    }

    #[test]
    fn failed_resolution_never_reaches_the_engine() {
        struct Untouchable;
        impl crate::CorrelationEngine for Untouchable {
            fn correlate(
                &self,
                _request: &CorrelationRequest,
                _events: &mut dyn Read,
            ) -> Result<Box<dyn Read>, Error> {
                panic!("engine invoked despite failed resolution");
            }
        }

        let mut resolver = ParameterResolver::new(FakeSource::new(Mode::T2));
        let params = CorrelationParams {
            mode: Some(Mode::T3),
            ..CorrelationParams::default()
        };
        let mut events = Cursor::new(Vec::new());
        let result = resolver.correlate(&Untouchable, &params, &mut events);
        assert!(matches!(
            result,
            Err(Error::UnsupportedModeConversion { .. })
        ));
    }

    #[test]
    fn t3_acquisition_can_be_down_converted() {
        let mut resolver = ParameterResolver::new(FakeSource::new(Mode::T3));
        let params = CorrelationParams {
            mode: Some(Mode::T2),
            order: Some(2),
            ..CorrelationParams::default()
        };
        let request = resolver.correlation_request(&params).unwrap();
        assert_eq!(request.mode, Mode::T2);
        assert_eq!(request.time_bins.n_bins, 587);
        assert_eq!(request.pulse_bins, None);
    }

    #[test]
    fn t3_order_two_request_gets_symmetric_and_pulse_grids() {
        let mut resolver = ParameterResolver::new(FakeSource::new(Mode::T3));
        let params = CorrelationParams {
            order: Some(2),
            ..CorrelationParams::default()
        };
        let request = resolver.correlation_request(&params).unwrap();
        assert_eq!(request.time_bins, Limits::new(-201_216.0, 201_216.0, 393));
        assert_eq!(request.pulse_bins, Some(Limits::new(-1.5, 1.5, 3)));
        assert_eq!(request.channel_count, 2);
    }

    #[test]
    fn t3_lifetime_request_uses_resolution_limited_grid() {
        let mut resolver = ParameterResolver::new(FakeSource::new(Mode::T3));
        let request = resolver
            .correlation_request(&CorrelationParams::default())
            .unwrap();
        assert_eq!(request.order, 1);
        assert_eq!(request.time_bins, Limits::new(0.0, 16.0 * 32_768.0, 32_768));
        assert_eq!(request.pulse_bins, None);
    }

    #[test]
    fn explicit_grids_are_passed_through() {
        let mut resolver = ParameterResolver::new(FakeSource::new(Mode::T3));
        let params = CorrelationParams {
            order: Some(2),
            time_bins: Some(Limits::new(-10.0, 10.0, 20)),
            pulse_bins: Some(Limits::new(-2.5, 2.5, 5)),
            ..CorrelationParams::default()
        };
        let request = resolver.correlation_request(&params).unwrap();
        assert_eq!(request.time_bins, Limits::new(-10.0, 10.0, 20));
        assert_eq!(request.pulse_bins, Some(Limits::new(-2.5, 2.5, 5)));
    }
}
