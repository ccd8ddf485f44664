use crate::errors::Error;

/// A fixed-bin-count histogram: `edges` has one more element than `counts`.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    pub edges: Vec<f64>,
    pub counts: Vec<u64>,
}

/// Histogram `values` into `n_bins` equal-width bins spanning the data range.
///
/// The rightmost bin is closed so the maximum value is counted. A degenerate
/// range (all values equal) is widened by 0.5 on each side.
pub fn histogram(values: &[f64], n_bins: usize) -> Result<Histogram, Error> {
    if values.is_empty() {
        return Err(Error::EmptyTrace("histogram", 1));
    }
    if n_bins == 0 {
        return Err(Error::UnsupportedConfiguration(
            "histogram needs at least one bin".to_string(),
        ));
    }

    let mut lower = f64::INFINITY;
    let mut upper = f64::NEG_INFINITY;
    for &value in values {
        if value < lower {
            lower = value;
        }
        if value > upper {
            upper = value;
        }
    }
    if lower == upper {
        lower -= 0.5;
        upper += 0.5;
    }

    let width = (upper - lower) / (n_bins as f64);
    let mut counts = vec![0u64; n_bins];
    for &value in values {
        let mut index = ((value - lower) / width).floor() as usize;
        if index >= n_bins {
            index = n_bins - 1;
        }
        counts[index] += 1;
    }

    let edges = (0..=n_bins)
        .map(|i| lower + width * (i as f64))
        .collect();

    Ok(Histogram { edges, counts })
}
