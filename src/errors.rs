use std::io;
use thiserror::Error as ThisError;

use crate::Mode;

#[derive(ThisError, Debug)]
pub enum Error {
    #[error("File {0} does not exist.")]
    FileNotAvailable(String),
    #[error("IO error.")]
    IOError(#[from] io::Error),
    #[error("Malformed intensity data: {0}")]
    MalformedInput(String),
    #[error("{0} needs at least {1} time bin(s)")]
    EmptyTrace(&'static str, usize),
    #[error("Cannot request {from} data as {to}")]
    UnsupportedModeConversion { from: Mode, to: Mode },
    #[error("Unsupported configuration: {0}")]
    UnsupportedConfiguration(String),
    #[error("External collaborator failed: {0}")]
    ExternalCollaborator(String),
}
