pub mod errors;
pub mod intensity_tools;
pub mod limits;
pub mod metadata;
pub mod parsers;
pub mod resolver;

use std::fmt;
use std::io::Read;
use std::str::FromStr;

use crate::errors::Error;
use crate::intensity_tools::trace::IntensityTrace;
use crate::resolver::CorrelationRequest;

/// Acquisition mode of a photon record stream.
///
/// `T2` is continuous time tagging: every timestamp is an absolute tick count.
/// `T3` is pulsed excitation tagging: timestamps are relative to a sync pulse
/// plus a pulse index, so derived quantities are per pulse rather than per
/// second.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Mode {
    T2,
    T3,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::T2 => "t2",
            Mode::T3 => "t3",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "t2" => Ok(Mode::T2),
            "t3" => Ok(Mode::T3),
            other => Err(Error::MalformedInput(format!("unknown mode: {}", other))),
        }
    }
}

/// Produces a raw tabular intensity stream for a configured acquisition.
///
/// Rows have the shape `bin_left, bin_right, count_0, count_1, ...`. The
/// producer is used both for genuine analysis passes and for the
/// channel-count detection probe, where `count_all` asks it to emit every
/// hardware channel regardless of activity.
pub trait RawIntensityProducer {
    fn intensity(
        &self,
        bin_width: f64,
        channels: usize,
        count_all: bool,
    ) -> Result<Box<dyn Read>, Error>;
}

/// External engine that computes the correlation function itself.
///
/// The engine consumes a fully resolved request plus a raw event stream and
/// returns its results as an opaque stream. Building the request is this
/// crate's job; everything past that point is not.
pub trait CorrelationEngine {
    fn correlate(
        &self,
        request: &CorrelationRequest,
        events: &mut dyn Read,
    ) -> Result<Box<dyn Read>, Error>;
}

/// Opaque blinking-state statistics returned by a [`BlinkingAnalyzer`].
#[derive(Debug, Clone)]
pub struct BlinkingStats(pub Vec<u8>);

/// External analyzer for on/off intensity-state switching.
///
/// It expects a normalized single-channel trace, which
/// [`IntensityTrace::blinking`] prepares before delegating.
pub trait BlinkingAnalyzer {
    fn analyze(&self, trace: &IntensityTrace) -> Result<BlinkingStats, Error>;
}
