use crate::compression::Compression;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SniffError>;

/// Reasons a file is classified as `bad`.
///
/// These never escape the crate as `Err`: the sniffer renders them into
/// [`SniffReport::error_message`](crate::SniffReport) so callers always get a
/// displayable message.
#[derive(Error, Debug)]
pub enum SniffError {
    #[error("could not open file: {0}")]
    Open(#[source] std::io::Error),

    #[error("could not read file: {0}")]
    Read(#[from] std::io::Error),

    #[error("could not decompress {kind} data: {source}")]
    Decompress {
        kind: Compression,
        #[source]
        source: std::io::Error,
    },

    #[error("file is empty")]
    Empty,

    #[error("file contains no sequence records")]
    NoRecords,

    #[error("could not detect FASTA/FASTQ format")]
    UnknownFormat,

    #[error("malformed FASTQ record at line {line}: {reason}")]
    MalformedFastq { line: u64, reason: &'static str },
}

impl SniffError {
    pub(crate) fn malformed_fastq(line: u64, reason: &'static str) -> Self {
        SniffError::MalformedFastq { line, reason }
    }
}
