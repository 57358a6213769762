//! Compression container detection by magic bytes.
//!
//! Detection never trusts file extensions: it peeks at the first bytes of the
//! stream, then hands the caller a decoded view that starts from byte zero of
//! the original input.

use crate::error::{Result, SniffError};
use bzip2::read::MultiBzDecoder;
use flate2::read::MultiGzDecoder;
use serde::Serialize;
use std::fmt;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};

const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];
const BZIP2_MAGIC: &[u8] = b"BZh";
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

/// Longest magic sequence we need to look at.
const MAGIC_LEN: usize = 4;

const DECODE_BUFFER: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    None,
    Gzip,
    Bzip2,
    Zip,
}

impl Compression {
    /// Classify a stream from its leading bytes. Anything unrecognised is
    /// treated as uncompressed and left to the format classifier to reject.
    pub fn detect(magic: &[u8]) -> Self {
        if magic.starts_with(GZIP_MAGIC) {
            Compression::Gzip
        } else if magic.starts_with(BZIP2_MAGIC) {
            Compression::Bzip2
        } else if magic.starts_with(ZIP_MAGIC) {
            Compression::Zip
        } else {
            Compression::None
        }
    }

    pub fn is_compressed(self) -> bool {
        self != Compression::None
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Compression::None => "none",
            Compression::Gzip => "gzip",
            Compression::Bzip2 => "bzip2",
            Compression::Zip => "zip",
        };
        f.write_str(name)
    }
}

/// Peek at the magic bytes of `reader`, then run `f` over the decoded stream.
///
/// The decoder and the underlying handle live only for the duration of the
/// call and are released when it returns. For zip archives only the first
/// entry is decoded, read from the local header as it streams past; entries
/// whose sizes only follow in a data descriptor need [`with_decoded_seekable`].
/// The detected container is returned even when `f` fails.
pub(crate) fn with_decoded<R, T, F>(mut reader: R, f: F) -> (Compression, Result<T>)
where
    R: Read,
    F: FnOnce(&mut dyn BufRead) -> Result<T>,
{
    let mut magic = [0u8; MAGIC_LEN];
    let filled = match read_magic(&mut reader, &mut magic) {
        Ok(filled) => filled,
        Err(e) => return (Compression::None, Err(e)),
    };
    let kind = Compression::detect(&magic[..filled]);
    tracing::debug!(compression = %kind, "detected compression");

    // Put the peeked bytes back in front of the remaining input.
    let rewound = (&magic[..filled]).chain(reader);

    let outcome = match kind {
        Compression::None => f(&mut BufReader::with_capacity(DECODE_BUFFER, rewound)),
        Compression::Gzip => f(&mut BufReader::with_capacity(
            DECODE_BUFFER,
            MultiGzDecoder::new(rewound),
        )),
        Compression::Bzip2 => f(&mut BufReader::with_capacity(
            DECODE_BUFFER,
            MultiBzDecoder::new(rewound),
        )),
        Compression::Zip => {
            let mut rewound = rewound;
            let decoded = match zip::read::read_zipfile_from_stream(&mut rewound) {
                Ok(Some(entry)) => f(&mut BufReader::with_capacity(DECODE_BUFFER, entry)),
                Ok(None) => f(&mut io::empty()),
                Err(e) => Err(zip_error(e)),
            };
            decoded
        }
    };

    (kind, decompress_failure(kind, outcome))
}

/// Like [`with_decoded`], but zip archives are opened through their central
/// directory, so entries written by streaming zip tools decode as well.
pub(crate) fn with_decoded_seekable<R, T, F>(mut reader: R, f: F) -> (Compression, Result<T>)
where
    R: Read + Seek,
    F: FnOnce(&mut dyn BufRead) -> Result<T>,
{
    let start = match reader.stream_position() {
        Ok(start) => start,
        Err(e) => return (Compression::None, Err(SniffError::Read(e))),
    };
    let mut magic = [0u8; MAGIC_LEN];
    let filled = match read_magic(&mut reader, &mut magic) {
        Ok(filled) => filled,
        Err(e) => return (Compression::None, Err(e)),
    };
    if let Err(e) = reader.seek(SeekFrom::Start(start)) {
        return (Compression::None, Err(SniffError::Read(e)));
    }

    let kind = Compression::detect(&magic[..filled]);
    if kind != Compression::Zip {
        return with_decoded(reader, f);
    }
    tracing::debug!(compression = %kind, "detected compression");

    let mut archive = match zip::ZipArchive::new(reader) {
        Ok(archive) => archive,
        Err(e) => return (kind, Err(zip_error(e))),
    };
    if archive.is_empty() {
        return (kind, f(&mut io::empty()));
    }
    let decoded = match archive.by_index(0) {
        Ok(entry) => f(&mut BufReader::with_capacity(DECODE_BUFFER, entry)),
        Err(e) => Err(zip_error(e)),
    };

    (kind, decompress_failure(kind, decoded))
}

fn zip_error(err: zip::result::ZipError) -> SniffError {
    SniffError::Decompress {
        kind: Compression::Zip,
        source: io::Error::new(io::ErrorKind::InvalidData, err),
    }
}

/// Read failures inside a decoder are decompression failures, not I/O ones.
fn decompress_failure<T>(kind: Compression, outcome: Result<T>) -> Result<T> {
    match outcome {
        Err(SniffError::Read(source)) if kind.is_compressed() => {
            Err(SniffError::Decompress { kind, source })
        }
        other => other,
    }
}

fn read_magic<R: Read>(reader: &mut R, magic: &mut [u8; MAGIC_LEN]) -> Result<usize> {
    let mut filled = 0;
    while filled < MAGIC_LEN {
        match reader.read(&mut magic[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(SniffError::Read(e)),
        }
    }
    Ok(filled)
}

/// Single stored entry written the way streaming zip tools do: sizes and CRC
/// are zero in the local header and follow the data in a descriptor.
#[cfg(test)]
pub(crate) fn streamed_zip(name: &str, data: &[u8]) -> Vec<u8> {
    let mut crc = flate2::Crc::new();
    crc.update(data);
    let (crc, size, name_len) = (crc.sum(), data.len() as u32, name.len() as u16);

    let mut out = Vec::new();
    out.extend_from_slice(&0x0403_4b50u32.to_le_bytes());
    out.extend_from_slice(&20u16.to_le_bytes()); // version needed
    out.extend_from_slice(&0x0008u16.to_le_bytes()); // data descriptor follows
    out.extend_from_slice(&0u16.to_le_bytes()); // stored
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&0x0021u16.to_le_bytes());
    out.extend_from_slice(&[0u8; 12]);
    out.extend_from_slice(&name_len.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(data);
    out.extend_from_slice(&0x0807_4b50u32.to_le_bytes());
    out.extend_from_slice(&crc.to_le_bytes());
    out.extend_from_slice(&size.to_le_bytes());
    out.extend_from_slice(&size.to_le_bytes());

    let central_start = out.len() as u32;
    out.extend_from_slice(&0x0201_4b50u32.to_le_bytes());
    out.extend_from_slice(&20u16.to_le_bytes()); // made by
    out.extend_from_slice(&20u16.to_le_bytes()); // needed
    out.extend_from_slice(&0x0008u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&0x0021u16.to_le_bytes());
    out.extend_from_slice(&crc.to_le_bytes());
    out.extend_from_slice(&size.to_le_bytes());
    out.extend_from_slice(&size.to_le_bytes());
    out.extend_from_slice(&name_len.to_le_bytes());
    out.extend_from_slice(&[0u8; 12]); // extra, comment, disk, attributes
    out.extend_from_slice(&0u32.to_le_bytes()); // local header offset
    out.extend_from_slice(name.as_bytes());
    let central_len = out.len() as u32 - central_start;

    out.extend_from_slice(&0x0605_4b50u32.to_le_bytes());
    out.extend_from_slice(&[0u8; 4]);
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&central_len.to_le_bytes());
    out.extend_from_slice(&central_start.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out
}
