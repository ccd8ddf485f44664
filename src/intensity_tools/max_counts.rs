use std::io::Write;

use log::info;

use crate::errors::Error;
use crate::parsers::table::{csv_io, IntensityRow};

/// The time bin with the largest summed count in an intensity stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaxCounts {
    pub bin_left: i64,
    pub bin_right: i64,
    pub counts: u64,
}

/// Scan a tabular intensity stream for the bin with the largest total count
/// across channels. The stream is consumed incrementally; only the current
/// best row is kept. An empty stream yields the zero row.
pub fn max_counts<I>(rows: I) -> Result<MaxCounts, Error>
where
    I: IntoIterator<Item = Result<IntensityRow, Error>>,
{
    let mut best = MaxCounts {
        bin_left: 0,
        bin_right: 0,
        counts: 0,
    };

    for row in rows {
        let row = row?;
        let total: u64 = row.counts.iter().sum();
        if total > best.counts {
            best = MaxCounts {
                bin_left: row.bin_left,
                bin_right: row.bin_right,
                counts: total,
            };
        }
    }

    Ok(best)
}

/// Persist the summary as a single `bin_left, bin_right, max_total_count`
/// row.
pub fn write_max_counts<W: Write>(summary: &MaxCounts, writer: W) -> Result<(), Error> {
    info!(
        "max counts {} in bin [{}, {})",
        summary.counts, summary.bin_left, summary.bin_right
    );
    let mut writer = csv::Writer::from_writer(writer);
    writer
        .write_record(&[
            summary.bin_left.to_string(),
            summary.bin_right.to_string(),
            summary.counts.to_string(),
        ])
        .map_err(csv_io)?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::table::IntensityRows;

    #[test]
    fn picks_the_bin_with_the_largest_total() {
        let rows = IntensityRows::new("0,100,3,4\n100,200,9,1\n200,300,5,2\n".as_bytes());
        let summary = max_counts(rows).unwrap();
        assert_eq!(
            summary,
            MaxCounts {
                bin_left: 100,
                bin_right: 200,
                counts: 10,
            }
        );
    }

    #[test]
    fn empty_stream_yields_the_zero_row() {
        let summary = max_counts(IntensityRows::new("".as_bytes())).unwrap();
        assert_eq!(summary.counts, 0);
        assert_eq!((summary.bin_left, summary.bin_right), (0, 0));
    }

    #[test]
    fn writes_a_single_summary_row() {
        let summary = MaxCounts {
            bin_left: 100,
            bin_right: 200,
            counts: 10,
        };
        let mut buffer = Vec::new();
        write_max_counts(&summary, &mut buffer).unwrap();
        assert_eq!(String::from_utf8(buffer).unwrap(), "100,200,10\n");
    }

    #[test]
    fn malformed_rows_abort_the_scan() {
        let rows = IntensityRows::new("0,100,3\nnot,a,row\n".as_bytes());
        assert!(matches!(max_counts(rows), Err(Error::MalformedInput(_))));
    }
}
