use std::io::{Read, Write};
use std::path::Path;

use log::info;
use ndarray::{s, Array1, Array2, ArrayView1, Axis};

use crate::errors::Error;
use crate::intensity_tools::histogram::{histogram, Histogram};
use crate::parsers::table::{csv_io, open_intensity_file, IntensityRow, IntensityRows};
use crate::{BlinkingAnalyzer, BlinkingStats, Mode};

/// Conversion factor from device picosecond ticks to seconds.
const PS_TO_S: f64 = 1e-12;

/// One time bin of an intensity trace.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct TimeBin {
    pub left: f64,
    pub right: f64,
}

impl TimeBin {
    pub fn width(&self) -> f64 {
        self.right - self.left
    }
}

/// A multi-channel, time-binned intensity trace.
///
/// Counts are stored channel-major in an owned `Array2<f64>` of shape
/// `(channels, bins)`; every channel covers exactly the same bin sequence.
/// All derived analyses (`summed`, `normalized`, `range`, `zero_origin`,
/// `threshold`, ...) return a new trace backed by fresh storage, so no two
/// traces ever alias each other's counts.
#[derive(Debug, Clone)]
pub struct IntensityTrace {
    mode: Mode,
    bins: Vec<TimeBin>,
    counts: Array2<f64>,
}

impl IntensityTrace {
    /// Build a trace from parsed rows.
    ///
    /// Rows must be strictly increasing in `bin_left` and carry the same
    /// number of channels throughout; any violation fails with
    /// [`Error::MalformedInput`] and no partial trace is produced.
    ///
    /// When `mode` is `None` it is auto-detected: a non-zero channel-0 total
    /// means t2 (in t3 intensity dumps channel 0 is the empty sync column).
    /// This is a best-effort heuristic, not authoritative.
    pub fn from_rows<I>(rows: I, mode: Option<Mode>) -> Result<Self, Error>
    where
        I: IntoIterator<Item = Result<IntensityRow, Error>>,
    {
        let mut bins: Vec<TimeBin> = Vec::new();
        let mut flat: Vec<f64> = Vec::new();
        let mut channels: Option<usize> = None;
        let mut previous_left: Option<i64> = None;

        for row in rows {
            let row = row?;

            match channels {
                None => channels = Some(row.counts.len()),
                Some(expected) if expected != row.counts.len() => {
                    return Err(Error::MalformedInput(format!(
                        "expected {} channel(s) per row, got {}",
                        expected,
                        row.counts.len()
                    )));
                }
                Some(_) => {}
            }

            if let Some(previous) = previous_left {
                if row.bin_left <= previous {
                    return Err(Error::MalformedInput(format!(
                        "time bins must be strictly increasing: {} after {}",
                        row.bin_left, previous
                    )));
                }
            }
            previous_left = Some(row.bin_left);

            bins.push(TimeBin {
                left: row.bin_left as f64,
                right: row.bin_right as f64,
            });
            flat.extend(row.counts.iter().map(|&count| count as f64));
        }

        let channels = channels.unwrap_or(0);
        let counts = Array2::from_shape_vec((bins.len(), channels), flat)
            .map_err(|e| Error::MalformedInput(e.to_string()))?
            .reversed_axes();

        let mode = match mode {
            Some(mode) => mode,
            None => {
                let channel_0_total: f64 = if counts.nrows() > 0 {
                    counts.row(0).sum()
                } else {
                    0.0
                };
                if channel_0_total != 0.0 {
                    Mode::T2
                } else {
                    Mode::T3
                }
            }
        };

        Ok(Self { mode, bins, counts })
    }

    /// Build a trace by incrementally consuming a tabular stream.
    pub fn from_reader<R: Read>(reader: R, mode: Option<Mode>) -> Result<Self, Error> {
        Self::from_rows(IntensityRows::new(reader), mode)
    }

    /// Read a trace from a file, trying `<path>.bz2` when the path is absent.
    pub fn from_file(path: &Path, mode: Option<Mode>) -> Result<Self, Error> {
        info!("reading intensity trace from {}", path.display());
        Self::from_reader(open_intensity_file(path)?, mode)
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn bins(&self) -> &[TimeBin] {
        &self.bins
    }

    pub fn n_bins(&self) -> usize {
        self.bins.len()
    }

    pub fn channel_count(&self) -> usize {
        self.counts.nrows()
    }

    /// Counts of a single channel across all bins.
    pub fn channel(&self, channel: usize) -> ArrayView1<'_, f64> {
        self.counts.row(channel)
    }

    /// Unit label of the time axis: seconds for t2, pulses for t3.
    pub fn time_unit(&self) -> &'static str {
        match self.mode {
            Mode::T2 => "s",
            Mode::T3 => "pulse",
        }
    }

    /// Largest single-bin count across all channels.
    pub fn max(&self) -> f64 {
        self.counts.iter().fold(0.0, |max, &v| if v > max { v } else { max })
    }

    /// Nominal bin width, taken from the second time bin.
    pub fn dt(&self) -> Result<f64, Error> {
        if self.bins.len() < 2 {
            return Err(Error::EmptyTrace("dt", 2));
        }
        Ok(self.bins[1].width())
    }

    /// Elementwise sum across channels into a single-channel trace with the
    /// same bins and mode.
    pub fn summed(&self) -> Self {
        let total = self.counts.sum_axis(Axis(0));
        Self {
            mode: self.mode,
            bins: self.bins.clone(),
            counts: total.insert_axis(Axis(0)),
        }
    }

    /// Per-bin mean count across channels.
    pub fn mean(&self) -> Result<Array1<f64>, Error> {
        if self.channel_count() == 0 {
            return Err(Error::EmptyTrace("mean", 1));
        }
        let channels = self.channel_count() as f64;
        Ok(self.summed().channel(0).mapv(|total| total / channels))
    }

    /// Counts divided by bin width: counts/second for t2, counts/pulse for t3.
    ///
    /// For t2 the bin edges are picosecond ticks and are rescaled to seconds
    /// before widths are taken; t3 pulse units are used as-is.
    pub fn normalized(&self) -> Self {
        let bins: Vec<TimeBin> = match self.mode {
            Mode::T2 => self
                .bins
                .iter()
                .map(|bin| TimeBin {
                    left: bin.left * PS_TO_S,
                    right: bin.right * PS_TO_S,
                })
                .collect(),
            Mode::T3 => self.bins.clone(),
        };

        let mut counts = self.counts.clone();
        for (index, bin) in bins.iter().enumerate() {
            let width = bin.width();
            counts.column_mut(index).mapv_inplace(|count| count / width);
        }

        Self {
            mode: self.mode,
            bins,
            counts,
        }
    }

    /// Convert a t3 trace to a t2 trace in seconds using the repetition rate:
    /// bin edges become `edge / rate` and counts become counts/second.
    pub fn pulses_to_seconds(&self, repetition_rate: f64) -> Result<Self, Error> {
        if self.mode == Mode::T2 {
            return Err(Error::UnsupportedConfiguration(
                "pulses_to_seconds requires a t3 trace".to_string(),
            ));
        }

        let bins = self
            .bins
            .iter()
            .map(|bin| TimeBin {
                left: bin.left / repetition_rate,
                right: bin.right / repetition_rate,
            })
            .collect();
        let counts = self.normalized().counts.mapv(|rate| rate * repetition_rate);

        Ok(Self {
            mode: Mode::T2,
            bins,
            counts,
        })
    }

    /// Sub-trace of the bins whose left edge falls in `[start, stop)`,
    /// located by binary search over the left edges.
    pub fn range(&self, start: f64, stop: f64) -> Self {
        let start_index = self.bins.partition_point(|bin| bin.left < start);
        let stop_index = self.bins.partition_point(|bin| bin.left < stop);

        Self {
            mode: self.mode,
            bins: self.bins[start_index..stop_index].to_vec(),
            counts: self.counts.slice(s![.., start_index..stop_index]).to_owned(),
        }
    }

    /// Shift all bin edges so the first left edge becomes zero.
    pub fn zero_origin(&self) -> Result<Self, Error> {
        let start = match self.bins.first() {
            Some(bin) => bin.left,
            None => return Err(Error::EmptyTrace("zero_origin", 1)),
        };

        let bins = self
            .bins
            .iter()
            .map(|bin| TimeBin {
                left: bin.left - start,
                right: bin.right - start,
            })
            .collect();

        Ok(Self {
            mode: self.mode,
            bins,
            counts: self.counts.clone(),
        })
    }

    /// Keep only the bins whose summed count reaches `fraction` of the
    /// summed trace's maximum. A fraction of 0 keeps everything; a fraction
    /// above 1 yields an empty trace.
    pub fn threshold(&self, fraction: f64) -> Self {
        let total = self.counts.sum_axis(Axis(0));
        let max_intensity = total.iter().fold(0.0, |max, &v| if v > max { v } else { max });
        let cutoff = fraction * max_intensity;

        let kept: Vec<usize> = (0..self.n_bins())
            .filter(|&index| total[index] >= cutoff)
            .collect();

        Self {
            mode: self.mode,
            bins: kept.iter().map(|&index| self.bins[index]).collect(),
            counts: self.counts.select(Axis(1), &kept),
        }
    }

    /// Histogram the intensities found in the trace into `n_bins` bins.
    ///
    /// With `summed` set, one histogram of the per-bin summed counts is
    /// returned (under channel index 0); otherwise one histogram per channel
    /// of that channel's normalized counts.
    pub fn histogram(&self, n_bins: usize, summed: bool) -> Result<Vec<(usize, Histogram)>, Error> {
        if self.channel_count() == 0 {
            return Err(Error::EmptyTrace("histogram", 1));
        }

        if summed {
            let source = if self.channel_count() > 1 {
                self.summed()
            } else {
                self.clone()
            };
            let values: Vec<f64> = source.channel(0).iter().cloned().collect();
            Ok(vec![(0, histogram(&values, n_bins)?)])
        } else {
            let normalized = self.normalized();
            (0..normalized.channel_count())
                .map(|channel| {
                    let values: Vec<f64> = normalized.channel(channel).iter().cloned().collect();
                    Ok((channel, histogram(&values, n_bins)?))
                })
                .collect()
        }
    }

    /// Run the blinking analysis on the normalized, summed trace.
    pub fn blinking<A: BlinkingAnalyzer + ?Sized>(
        &self,
        analyzer: &A,
    ) -> Result<BlinkingStats, Error> {
        analyzer.analyze(&self.summed().normalized())
    }

    /// Serialize the trace back to tabular rows.
    pub fn write_to<W: Write>(&self, writer: W) -> Result<(), Error> {
        let mut writer = csv::Writer::from_writer(writer);
        for (index, bin) in self.bins.iter().enumerate() {
            let mut record = vec![bin.left.to_string(), bin.right.to_string()];
            record.extend(self.counts.column(index).iter().map(|count| count.to_string()));
            writer.write_record(&record).map_err(csv_io)?;
        }
        writer.flush()?;
        Ok(())
    }
}
