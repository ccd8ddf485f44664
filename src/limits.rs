use std::fmt;
use std::str::FromStr;

use crate::errors::Error;

/// A closed-open numeric range `[lower, upper)` partitioned into `n_bins`
/// equal-width bins.
///
/// This is the exchange format for every grid handed to the correlation
/// engine. On the wire it reads `lower,n_bins,upper`.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Limits {
    pub lower: f64,
    pub n_bins: usize,
    pub upper: f64,
}

impl Limits {
    pub fn new(lower: f64, upper: f64, n_bins: usize) -> Self {
        Self {
            lower,
            n_bins,
            upper,
        }
    }

    /// Width of a single bin of the partition.
    pub fn bin_width(&self) -> f64 {
        (self.upper - self.lower) / (self.n_bins as f64)
    }

    /// The `n_bins + 1` bin edges, lower to upper.
    pub fn edges(&self) -> Vec<f64> {
        let width = self.bin_width();
        (0..=self.n_bins)
            .map(|i| self.lower + width * (i as f64))
            .collect()
    }
}

impl fmt::Display for Limits {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{},{},{}", self.lower, self.n_bins, self.upper)
    }
}

impl FromStr for Limits {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        let fields: Vec<&str> = s.split(',').collect();
        if fields.len() != 3 {
            return Err(Error::MalformedInput(format!(
                "limits must be lower,n_bins,upper: {}",
                s
            )));
        }

        let parse_f64 = |field: &str| {
            field
                .trim()
                .parse::<f64>()
                .map_err(|_| Error::MalformedInput(format!("invalid limits bound: {}", field)))
        };
        let lower = parse_f64(fields[0])?;
        let n_bins = fields[1]
            .trim()
            .parse::<usize>()
            .map_err(|_| Error::MalformedInput(format!("invalid bin count: {}", fields[1])))?;
        let upper = parse_f64(fields[2])?;

        Ok(Self {
            lower,
            n_bins,
            upper,
        })
    }
}
