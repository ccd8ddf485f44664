use crate::errors::Error;
use crate::limits::Limits;
use crate::Mode;

/// Repetition rate assumed when a t2 acquisition is auto-binned without a
/// known rate.
pub const DEFAULT_REPETITION_RATE: f64 = 4_999_990.0;

/// Default histogram bin width, in device ticks, for auto-derived grids.
pub const DEFAULT_TIME_BIN_WIDTH: f64 = 1024.0;

const LIFETIME_BINS: usize = 1 << 15;

/// Resolution-limited grid spanning one pulse period, for lifetime-style
/// (t3, order 1) requests.
pub fn t3_lifetime_bins(resolution: f64) -> Limits {
    Limits::new(0.0, resolution * LIFETIME_BINS as f64, LIFETIME_BINS)
}

/// Symmetric grid around zero delay covering one repetition period per side,
/// with an odd bin count so zero delay sits at a bin center.
fn symmetric_bins(repetition_rate: f64, time_bin_width: f64, margin: f64) -> Limits {
    let repetition_time = 1e12 / repetition_rate;
    let bins_per_side = (repetition_time / time_bin_width * margin).ceil() as usize;
    let n_bins = bins_per_side * 2 + 1;
    let bound = bins_per_side as f64 * time_bin_width + time_bin_width / 2.0;
    Limits::new(-bound, bound, n_bins)
}

/// Time-bin grid for higher-order (order >= 2) t3 correlations.
pub fn t3_correlation_bins(repetition_rate: f64, time_bin_width: f64) -> Limits {
    symmetric_bins(repetition_rate, time_bin_width, 1.0)
}

/// Time-bin grid for auto-binned t2 correlations. Carries a 1.5x safety
/// margin since t2 delays are not folded into a pulse period.
pub fn t2_correlation_bins(repetition_rate: f64, time_bin_width: f64) -> Limits {
    symmetric_bins(repetition_rate, time_bin_width, 1.5)
}

/// Default pulse-bin grid for higher-order t3 correlations: the center pulse
/// and one neighbour on each side.
pub fn default_pulse_bins() -> Limits {
    Limits::new(-1.5, 1.5, 3)
}

/// Derive the time-bin grid for a correlation request.
///
/// Any order/mode pair without a rule fails with
/// [`Error::UnsupportedConfiguration`]; nothing is silently defaulted.
pub fn time_bins_for(
    mode: Mode,
    order: u32,
    resolution: f64,
    repetition_rate: f64,
    time_bin_width: f64,
) -> Result<Limits, Error> {
    match (mode, order) {
        (Mode::T3, 1) => Ok(t3_lifetime_bins(resolution)),
        (Mode::T3, order) if order >= 2 => Ok(t3_correlation_bins(repetition_rate, time_bin_width)),
        (Mode::T2, _) => Ok(t2_correlation_bins(repetition_rate, time_bin_width)),
        (mode, order) => Err(Error::UnsupportedConfiguration(format!(
            "no automatic time bins for order {} in {} mode",
            order, mode
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn t3_higher_order_grid() {
        // repetition_time = 1e12 / 5e6 = 200_000 ticks.
        let limits = t3_correlation_bins(5_000_000.0, 1024.0);
        assert_eq!(limits.n_bins, 393);
        assert_relative_eq!(limits.lower, -201_216.0);
        assert_relative_eq!(limits.upper, 201_216.0);
    }

    #[test]
    fn t2_grid_carries_a_safety_margin() {
        let limits = t2_correlation_bins(5_000_000.0, 1024.0);
        assert_eq!(limits.n_bins, 587);
        assert_relative_eq!(limits.lower, -(293.0 * 1024.0 + 512.0));
    }

    #[test]
    fn lifetime_grid_is_resolution_limited() {
        let limits = t3_lifetime_bins(16.0);
        assert_eq!(limits.n_bins, 1 << 15);
        assert_relative_eq!(limits.lower, 0.0);
        assert_relative_eq!(limits.upper, 16.0 * ((1 << 15) as f64));
    }

    #[test]
    fn dispatch_rejects_uncovered_pairs() {
        assert!(time_bins_for(Mode::T3, 2, 16.0, 5e6, 1024.0).is_ok());
        assert!(time_bins_for(Mode::T2, 1, 16.0, 5e6, 1024.0).is_ok());
        assert!(matches!(
            time_bins_for(Mode::T3, 0, 16.0, 5e6, 1024.0),
            Err(Error::UnsupportedConfiguration(_))
        ));
    }
}
