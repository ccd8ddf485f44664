use std::fs::File;
use std::io::Read;
use std::path::Path;

use bzip2::read::BzDecoder;
use log::debug;

use crate::errors::Error;

/// One row of a tabular intensity stream: a time bin plus the counts seen on
/// every channel during that bin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntensityRow {
    pub bin_left: i64,
    pub bin_right: i64,
    pub counts: Vec<u64>,
}

/// Incremental reader over a tabular intensity stream.
///
/// Rows are `bin_left, bin_right, count_0, count_1, ...`, all integers. The
/// iterator parses one row at a time so memory stays bounded by whatever the
/// consumer keeps, not by the raw input size. Irregular rows surface as
/// [`Error::MalformedInput`].
pub struct IntensityRows<R: Read> {
    records: csv::StringRecordsIntoIter<R>,
}

impl<R: Read> IntensityRows<R> {
    pub fn new(reader: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);
        Self {
            records: reader.into_records(),
        }
    }
}

fn parse_row(record: &csv::StringRecord) -> Result<IntensityRow, Error> {
    if record.len() < 3 {
        return Err(Error::MalformedInput(format!(
            "intensity row needs bin edges and at least one channel, got {} field(s)",
            record.len()
        )));
    }

    let int_field = |index: usize| -> Result<i64, Error> {
        record[index]
            .parse::<i64>()
            .map_err(|_| Error::MalformedInput(format!("invalid integer field: {}", &record[index])))
    };

    let bin_left = int_field(0)?;
    let bin_right = int_field(1)?;
    let counts = (2..record.len())
        .map(|index| {
            record[index].parse::<u64>().map_err(|_| {
                Error::MalformedInput(format!("invalid count field: {}", &record[index]))
            })
        })
        .collect::<Result<Vec<u64>, Error>>()?;

    Ok(IntensityRow {
        bin_left,
        bin_right,
        counts,
    })
}

impl<R: Read> Iterator for IntensityRows<R> {
    type Item = Result<IntensityRow, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.records.next()? {
            Ok(record) => Some(parse_row(&record)),
            Err(e) => Some(Err(Error::MalformedInput(e.to_string()))),
        }
    }
}

pub(crate) fn csv_io(e: csv::Error) -> Error {
    Error::IOError(std::io::Error::new(std::io::ErrorKind::Other, e))
}

/// Open a tabular intensity file, falling back to the conventional
/// `<path>.bz2` sibling when the primary path is absent. Compressed sources
/// are decoded transparently.
pub fn open_intensity_file(path: &Path) -> Result<Box<dyn Read>, Error> {
    if path.exists() {
        debug!("opening intensity stream {}", path.display());
        let file = File::open(path)?;
        if path.extension().map_or(false, |ext| ext == "bz2") {
            return Ok(Box::new(BzDecoder::new(file)));
        }
        return Ok(Box::new(file));
    }

    let compressed = path.with_file_name(format!(
        "{}.bz2",
        path.file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    ));
    if compressed.exists() {
        debug!("opening compressed intensity stream {}", compressed.display());
        return Ok(Box::new(BzDecoder::new(File::open(compressed)?)));
    }

    Err(Error::FileNotAvailable(path.display().to_string()))
}
