//! Streaming sniffer for sequencing files.
//!
//! Detects the compression container, the FASTA/FASTQ format and a set of
//! alphabet and layout properties from a bounded, deterministic sample of
//! records, without holding the file in memory.
//!
//! ```no_run
//! let report = seqdrop_sniff::sniff_file("reads.fq.gz");
//! if let Err(rejection) = report.acceptance() {
//!     eprintln!("{rejection}");
//! }
//! ```

mod analyze;
mod compression;
mod error;
mod format;
mod report;

pub use analyze::SeqType;
pub use compression::Compression;
pub use error::SniffError;
pub use format::FileType;
pub use report::{Rejection, SniffReport};

use analyze::{analyze, SequenceStats};
use compression::{with_decoded, with_decoded_seekable};
use format::classify;
use std::fs::File;
use std::io::{BufRead, Read, Seek};
use std::path::Path;

/// Default number of records sampled for statistics.
pub const DEFAULT_MAX_RECORDS: u64 = 10_000;

/// Default number of residues sampled for statistics.
pub const DEFAULT_MAX_BASES: u64 = 100_000_000;

/// Sampling policy. Sniffing stops at whichever limit is reached first, so the
/// estimates describe the same leading prefix of the file every time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SniffOptions {
    pub max_records: u64,
    pub max_bases: u64,
}

impl Default for SniffOptions {
    fn default() -> Self {
        Self {
            max_records: DEFAULT_MAX_RECORDS,
            max_bases: DEFAULT_MAX_BASES,
        }
    }
}

/// Sniff a file on disk with the default sampling policy.
pub fn sniff_file(path: impl AsRef<Path>) -> SniffReport {
    sniff_file_with(path, &SniffOptions::default())
}

pub fn sniff_file_with(path: impl AsRef<Path>, options: &SniffOptions) -> SniffReport {
    let path = path.as_ref();
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) => {
            tracing::warn!("could not open {}: {}", path.display(), e);
            return SniffReport::bad(Compression::None, &SniffError::Open(e));
        }
    };

    let report = sniff_seekable_with(file, options);
    tracing::info!(
        path = %path.display(),
        compression = %report.compression,
        file_type = ?report.file_type,
        "sniffed file"
    );
    report
}

/// Sniff any byte source. Failures are reported inline as a `bad` report.
///
/// The source is read strictly forward. Zip entries whose sizes are only
/// given after the data cannot be decoded this way; use
/// [`sniff_seekable_with`] when the source can seek.
pub fn sniff_reader_with<R: Read>(reader: R, options: &SniffOptions) -> SniffReport {
    let (compression, outcome) = with_decoded(reader, |stream| sniff_stream(stream, options));
    into_report(compression, outcome)
}

/// Sniff a seekable source such as an open file.
pub fn sniff_seekable_with<R: Read + Seek>(reader: R, options: &SniffOptions) -> SniffReport {
    let (compression, outcome) =
        with_decoded_seekable(reader, |stream| sniff_stream(stream, options));
    into_report(compression, outcome)
}

fn sniff_stream(
    stream: &mut dyn BufRead,
    options: &SniffOptions,
) -> Result<(FileType, SequenceStats), SniffError> {
    let mut classified = classify(stream)?;
    let file_type = classified.file_type;
    let stats = analyze(file_type, classified.stream(), options)?;
    Ok((file_type, stats))
}

fn into_report(
    compression: Compression,
    outcome: Result<(FileType, SequenceStats), SniffError>,
) -> SniffReport {
    match outcome {
        Ok((file_type, stats)) => SniffReport::from_stats(compression, file_type, stats),
        Err(error) => {
            tracing::debug!("rejected file: {}", error);
            SniffReport::bad(compression, &error)
        }
    }
}
