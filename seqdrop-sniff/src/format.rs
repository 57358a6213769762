//! FASTA/FASTQ classification from the leading record of a decoded stream.

use crate::error::{Result, SniffError};
use serde::Serialize;
use std::io::{BufRead, Chain, Cursor, Read};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Fasta,
    Fastq,
    #[default]
    Bad,
}

/// A classified stream. Reading from [`Classified::stream`] starts again at
/// the first record byte the classifier saw.
pub(crate) struct Classified<'a> {
    pub file_type: FileType,
    stream: Chain<Cursor<Vec<u8>>, &'a mut dyn BufRead>,
}

impl<'a> Classified<'a> {
    pub fn stream(&mut self) -> &mut dyn BufRead {
        &mut self.stream
    }
}

/// Most bytes the classifier buffers for replay. A FASTQ record longer than
/// this is accepted on its header and left to the analyzer to validate.
const PREFIX_LIMIT: usize = 1024 * 1024;

enum Fill {
    Line,
    Eof,
    Full,
}

/// Decide between FASTA and FASTQ by reading at most the first record.
///
/// FASTA needs nothing beyond the first marker byte. FASTQ is only accepted
/// once a complete record (header, sequence, `+` separator, quality of equal
/// length) has been seen, within [`PREFIX_LIMIT`] bytes.
pub(crate) fn classify(input: &mut dyn BufRead) -> Result<Classified<'_>> {
    let mut consumed = Vec::new();
    let file_type = detect(input, &mut consumed)?;
    tracing::debug!(?file_type, prefix_bytes = consumed.len(), "classified stream");

    Ok(Classified {
        file_type,
        stream: Cursor::new(consumed).chain(input),
    })
}

fn detect(input: &mut dyn BufRead, consumed: &mut Vec<u8>) -> Result<FileType> {
    // Leading whitespace carries nothing, so it is dropped rather than kept
    // for replay.
    let mut seen_any = false;
    let first = loop {
        let buf = input.fill_buf()?;
        if buf.is_empty() {
            return Err(if seen_any {
                SniffError::NoRecords
            } else {
                SniffError::Empty
            });
        }
        seen_any = true;
        match buf.iter().position(|b| !b.is_ascii_whitespace()) {
            Some(at) => {
                let first = buf[at];
                input.consume(at);
                break first;
            }
            None => {
                let len = buf.len();
                input.consume(len);
            }
        }
    };

    match first {
        b'>' => Ok(FileType::Fasta),
        b'@' => {
            check_fastq_record(input, consumed)?;
            Ok(FileType::Fastq)
        }
        _ => Err(SniffError::UnknownFormat),
    }
}

/// Append the next line to `consumed` without letting it grow past
/// [`PREFIX_LIMIT`].
fn fill_line(input: &mut dyn BufRead, consumed: &mut Vec<u8>) -> Result<Fill> {
    let room = PREFIX_LIMIT.saturating_sub(consumed.len());
    if room == 0 {
        return Ok(Fill::Full);
    }
    let read = Read::take(&mut *input, room as u64).read_until(b'\n', consumed)?;
    if read == 0 {
        Ok(Fill::Eof)
    } else if consumed.last() == Some(&b'\n') || read < room {
        Ok(Fill::Line)
    } else {
        Ok(Fill::Full)
    }
}

fn check_fastq_record(input: &mut dyn BufRead, consumed: &mut Vec<u8>) -> Result<()> {
    let mut line_number = 1u64;
    match fill_line(input, consumed)? {
        Fill::Line | Fill::Eof => {}
        Fill::Full => return Ok(()),
    }

    let mut seq_len = 0u64;
    loop {
        let start = consumed.len();
        match fill_line(input, consumed)? {
            Fill::Line => {}
            Fill::Full => return Ok(()),
            Fill::Eof => {
                return Err(SniffError::malformed_fastq(line_number, "missing '+' separator"))
            }
        }
        line_number += 1;
        let line = trim_line(&consumed[start..]);
        if line.first() == Some(&b'+') {
            break;
        }
        seq_len += residue_count(line);
    }

    let mut qual_len = 0u64;
    while qual_len < seq_len {
        let start = consumed.len();
        match fill_line(input, consumed)? {
            Fill::Line => {}
            Fill::Full => return Ok(()),
            Fill::Eof => {
                return Err(SniffError::malformed_fastq(line_number, "truncated quality string"))
            }
        }
        line_number += 1;
        qual_len += residue_count(trim_line(&consumed[start..]));
    }

    if qual_len != seq_len {
        return Err(SniffError::malformed_fastq(
            line_number,
            "quality length does not match sequence length",
        ));
    }
    Ok(())
}

/// Strip the line terminator (`\n` or `\r\n`).
pub(crate) fn trim_line(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    while end > 0 && matches!(line[end - 1], b'\n' | b'\r') {
        end -= 1;
    }
    &line[..end]
}

pub(crate) fn is_blank(line: &[u8]) -> bool {
    line.iter().all(u8::is_ascii_whitespace)
}

pub(crate) fn residue_count(line: &[u8]) -> u64 {
    line.iter().filter(|b| !b.is_ascii_whitespace()).count() as u64
}
