//! Streaming alphabet and layout statistics over the sampled records.
//!
//! Records are never materialised: every sequence line is folded into a
//! running [`Tally`] through a byte-class lookup table, so memory stays flat
//! regardless of record length.

use crate::error::{Result, SniffError};
use crate::format::{is_blank, residue_count, trim_line, FileType};
use crate::SniffOptions;
use serde::Serialize;
use std::io::{BufRead, Read};

/// Fraction of non-`ACGTUN` residues above which a file is called amino acid.
const AA_FOREIGN_FRACTION: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SeqType {
    Dna,
    Aa,
    #[default]
    Unknown,
}

/// Everything the analyzer derives from the sample.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceStats {
    pub seq_type: SeqType,
    pub multiline: bool,
    pub has_gaps: bool,
    pub has_lowercase: bool,
    pub has_iupac: bool,
    pub has_unknowns: bool,
    pub est_avg_len: f64,
    pub est_gc: f64,
    pub interleaved: bool,
    pub records: u64,
}

// Byte classes
const NUCLEOTIDE: u8 = 1 << 0;
const IUPAC: u8 = 1 << 1;
const GAP: u8 = 1 << 2;
const LOWER: u8 = 1 << 3;
const GC: u8 = 1 << 4;
const CALLED: u8 = 1 << 5;
const UNKNOWN: u8 = 1 << 6;
const SPACE: u8 = 1 << 7;

static CLASSES: [u8; 256] = build_classes();

const fn build_classes() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        let byte = i as u8;
        let mut class = match byte.to_ascii_uppercase() {
            b'A' | b'T' | b'U' => NUCLEOTIDE | CALLED,
            b'C' | b'G' => NUCLEOTIDE | CALLED | GC,
            b'N' => NUCLEOTIDE | UNKNOWN,
            b'R' | b'Y' | b'S' | b'W' | b'K' | b'M' | b'B' | b'D' | b'H' | b'V' => IUPAC,
            b'-' | b'.' => GAP,
            b' ' | b'\t' | b'\r' | b'\n' | 0x0b | 0x0c => SPACE,
            _ => 0,
        };
        if byte.is_ascii_lowercase() && class & (NUCLEOTIDE | IUPAC) != 0 {
            class |= LOWER;
        }
        table[i] = class;
        i += 1;
    }
    table
}

#[derive(Debug, Default)]
struct Tally {
    residues: u64,
    foreign: u64,
    called: u64,
    gc: u64,
    gaps: bool,
    lowercase: bool,
    iupac: bool,
    unknowns: bool,
}

impl Tally {
    /// Fold one sequence line in; returns its length in non-whitespace bytes.
    fn scan(&mut self, line: &[u8]) -> u64 {
        let mut len = 0;
        for &byte in line {
            let class = CLASSES[byte as usize];
            if class & SPACE != 0 {
                continue;
            }
            len += 1;
            if class & GAP != 0 {
                self.gaps = true;
                continue;
            }
            self.residues += 1;
            if class & NUCLEOTIDE == 0 {
                self.foreign += 1;
            }
            if class & CALLED != 0 {
                self.called += 1;
            }
            if class & GC != 0 {
                self.gc += 1;
            }
            self.iupac |= class & IUPAC != 0;
            self.lowercase |= class & LOWER != 0;
            self.unknowns |= class & UNKNOWN != 0;
        }
        len
    }

    fn seq_type(&self) -> SeqType {
        if self.residues == 0 {
            SeqType::Unknown
        } else if self.foreign as f64 > self.residues as f64 * AA_FOREIGN_FRACTION {
            SeqType::Aa
        } else {
            SeqType::Dna
        }
    }
}

/// Recognise the mate number of a paired-end read header.
///
/// Handles `name/1`, `name.1` and the Casava 1.8 form `name 1:N:0:...`.
/// Returns the shared base name and the mate number.
fn parse_mate(header: &[u8]) -> Option<(&[u8], u8)> {
    let mut fields = header
        .split(|b| b.is_ascii_whitespace())
        .filter(|field| !field.is_empty());
    let id = fields.next()?;

    if id.len() > 2 {
        let (base, suffix) = id.split_at(id.len() - 2);
        match suffix {
            b"/1" | b".1" => return Some((base, 1)),
            b"/2" | b".2" => return Some((base, 2)),
            _ => {}
        }
    }

    match fields.next() {
        Some(comment) if comment.starts_with(b"1:") => Some((id, 1)),
        Some(comment) if comment.starts_with(b"2:") => Some((id, 2)),
        _ => None,
    }
}

/// Checks that records arrive as (mate 1, mate 2) pairs sharing a base name.
///
/// A mate 1 left waiting when the sample ends is not held against the file;
/// only the end of the input can leave it unpaired.
#[derive(Debug, Default)]
struct PairTracker {
    pending: Option<Vec<u8>>,
    pairs: u64,
    broken: bool,
}

impl PairTracker {
    fn push(&mut self, header: &[u8]) {
        if self.broken {
            return;
        }
        match (self.pending.take(), parse_mate(header)) {
            (None, Some((base, 1))) => self.pending = Some(base.to_vec()),
            (Some(first), Some((base, 2))) if first == base => self.pairs += 1,
            _ => self.broken = true,
        }
    }

    fn end_of_input(&mut self) {
        if self.pending.is_some() {
            self.broken = true;
        }
    }

    fn interleaved(&self) -> bool {
        !self.broken && self.pairs > 0
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct RecordShape {
    lines: u64,
    len: u64,
}

#[derive(Debug, Default)]
struct Accumulator {
    tally: Tally,
    pairs: PairTracker,
    records: u64,
    total_len: u64,
    multiline: bool,
}

impl Accumulator {
    fn finish_record(&mut self, shape: RecordShape) {
        self.records += 1;
        self.total_len += shape.len;
        self.multiline |= shape.lines > 1;
    }

    fn sample_full(&self, options: &SniffOptions) -> bool {
        self.records >= options.max_records || self.tally.residues >= options.max_bases
    }

    fn into_stats(self) -> Result<SequenceStats> {
        if self.records == 0 {
            return Err(SniffError::NoRecords);
        }

        let seq_type = self.tally.seq_type();
        // Gap, case and ambiguity flags only mean something for nucleotides.
        let nucleotide = seq_type == SeqType::Dna;
        let est_gc = if self.tally.called == 0 {
            0.0
        } else {
            self.tally.gc as f64 / self.tally.called as f64
        };

        Ok(SequenceStats {
            seq_type,
            multiline: self.multiline,
            has_gaps: nucleotide && self.tally.gaps,
            has_lowercase: nucleotide && self.tally.lowercase,
            has_iupac: nucleotide && self.tally.iupac,
            has_unknowns: nucleotide && self.tally.unknowns,
            est_avg_len: self.total_len as f64 / self.records as f64,
            est_gc,
            interleaved: self.pairs.interleaved(),
            records: self.records,
        })
    }
}

/// Why a scanner stopped reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stop {
    EndOfInput,
    SampleFull,
}

/// Longest piece of a physical line held in memory at once.
const FRAGMENT_LEN: u64 = 64 * 1024;

/// Walks the input in line fragments of at most [`FRAGMENT_LEN`] bytes, so a
/// single-line chromosome never has to fit in memory.
struct LineReader<'a> {
    inner: &'a mut dyn BufRead,
    buf: Vec<u8>,
    line_number: u64,
    starts_line: bool,
    ends_line: bool,
}

impl<'a> LineReader<'a> {
    fn new(inner: &'a mut dyn BufRead) -> Self {
        Self {
            inner,
            buf: Vec::with_capacity(256),
            line_number: 0,
            starts_line: true,
            ends_line: true,
        }
    }

    /// Move to the next fragment; `false` at end of input.
    fn advance(&mut self) -> Result<bool> {
        self.starts_line = self.ends_line;
        self.buf.clear();
        let read = Read::take(&mut *self.inner, FRAGMENT_LEN).read_until(b'\n', &mut self.buf)?;
        if read == 0 {
            self.ends_line = true;
            return Ok(false);
        }
        self.ends_line = self.buf.last() == Some(&b'\n') || (read as u64) < FRAGMENT_LEN;
        if self.starts_line {
            self.line_number += 1;
        }
        Ok(true)
    }

    /// Skip whatever is left of the current physical line.
    fn finish_line(&mut self) -> Result<()> {
        while !self.ends_line {
            if !self.advance()? {
                break;
            }
        }
        Ok(())
    }

    fn current(&self) -> &[u8] {
        trim_line(&self.buf)
    }
}

/// Stream records of an already classified file and summarise the sample.
pub(crate) fn analyze(
    file_type: FileType,
    input: &mut dyn BufRead,
    options: &SniffOptions,
) -> Result<SequenceStats> {
    let mut lines = LineReader::new(input);
    let mut acc = Accumulator::default();

    let stop = match file_type {
        FileType::Fasta => scan_fasta(&mut lines, &mut acc, options)?,
        FileType::Fastq => scan_fastq(&mut lines, &mut acc, options)?,
        FileType::Bad => return Err(SniffError::UnknownFormat),
    };
    if stop == Stop::EndOfInput {
        acc.pairs.end_of_input();
    }

    tracing::debug!(
        records = acc.records,
        residues = acc.tally.residues,
        lines = lines.line_number,
        ?stop,
        "sampled sequence records"
    );
    acc.into_stats()
}

fn scan_fasta(
    lines: &mut LineReader<'_>,
    acc: &mut Accumulator,
    options: &SniffOptions,
) -> Result<Stop> {
    let mut record: Option<RecordShape> = None;
    // Rest of a header or comment line spread over several fragments
    let mut skipping = false;
    let mut line_counted = false;

    while lines.advance()? {
        let fragment = lines.current();
        if lines.starts_line {
            skipping = false;
            line_counted = false;
            if let Some(header) = fragment.strip_prefix(b">") {
                if let Some(done) = record.take() {
                    acc.finish_record(done);
                }
                if acc.sample_full(options) {
                    return Ok(Stop::SampleFull);
                }
                acc.pairs.push(header);
                record = Some(RecordShape::default());
                skipping = true;
                continue;
            }
            if fragment.starts_with(b";") {
                skipping = true;
                continue;
            }
        }
        if skipping || is_blank(fragment) {
            continue;
        }
        if let Some(shape) = record.as_mut() {
            if !line_counted {
                shape.lines += 1;
                line_counted = true;
            }
            shape.len += acc.tally.scan(fragment);
            if acc.tally.residues >= options.max_bases {
                if let Some(done) = record.take() {
                    acc.finish_record(done);
                }
                return Ok(Stop::SampleFull);
            }
        }
    }

    if let Some(done) = record.take() {
        acc.finish_record(done);
    }
    Ok(Stop::EndOfInput)
}

fn scan_fastq(
    lines: &mut LineReader<'_>,
    acc: &mut Accumulator,
    options: &SniffOptions,
) -> Result<Stop> {
    loop {
        // Header, skipping blank lines between records
        loop {
            if !lines.advance()? {
                return Ok(Stop::EndOfInput);
            }
            if !is_blank(lines.current()) {
                break;
            }
        }
        let header = match lines.current().strip_prefix(b"@") {
            Some(header) if lines.starts_line => header,
            _ => {
                return Err(SniffError::malformed_fastq(
                    lines.line_number,
                    "expected '@' at start of record",
                ))
            }
        };
        if acc.sample_full(options) {
            return Ok(Stop::SampleFull);
        }
        acc.pairs.push(header);
        lines.finish_line()?;

        let mut shape = RecordShape::default();
        let mut line_counted = false;
        loop {
            if !lines.advance()? {
                return Err(SniffError::malformed_fastq(
                    lines.line_number,
                    "missing '+' separator",
                ));
            }
            let fragment = lines.current();
            if lines.starts_line {
                line_counted = false;
                if fragment.starts_with(b"+") {
                    lines.finish_line()?;
                    break;
                }
            }
            if is_blank(fragment) {
                continue;
            }
            if !line_counted {
                shape.lines += 1;
                line_counted = true;
            }
            shape.len += acc.tally.scan(fragment);
            if acc.tally.residues >= options.max_bases {
                acc.finish_record(shape);
                return Ok(Stop::SampleFull);
            }
        }

        // Quality lines may legitimately start with '@' or '+', so they are
        // consumed by length rather than by marker.
        let mut qual_len = 0;
        while qual_len < shape.len {
            if !lines.advance()? {
                return Err(SniffError::malformed_fastq(
                    lines.line_number,
                    "truncated quality string",
                ));
            }
            qual_len += residue_count(lines.current());
        }
        while !lines.ends_line {
            if !lines.advance()? {
                break;
            }
            qual_len += residue_count(lines.current());
        }
        if qual_len != shape.len {
            return Err(SniffError::malformed_fastq(
                lines.line_number,
                "quality length does not match sequence length",
            ));
        }

        acc.finish_record(shape);
        if acc.tally.residues >= options.max_bases {
            return Ok(Stop::SampleFull);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(file_type: FileType, data: &[u8]) -> Result<SequenceStats> {
        let mut input: &[u8] = data;
        analyze(file_type, &mut input, &SniffOptions::default())
    }

    #[test]
    fn test_byte_classes() {
        assert_eq!(CLASSES[b'G' as usize], NUCLEOTIDE | CALLED | GC);
        assert_eq!(CLASSES[b'n' as usize], NUCLEOTIDE | UNKNOWN | LOWER);
        assert_eq!(CLASSES[b'r' as usize], IUPAC | LOWER);
        assert_eq!(CLASSES[b'-' as usize], GAP);
        assert_eq!(CLASSES[b'E' as usize], 0);
        assert_eq!(CLASSES[b'e' as usize], 0);
    }

    #[test]
    fn test_parse_mate() {
        assert_eq!(parse_mate(b"read7/1"), Some((&b"read7"[..], 1)));
        assert_eq!(parse_mate(b"read7.2 extra"), Some((&b"read7"[..], 2)));
        assert_eq!(
            parse_mate(b"M00123:8:000:1:1101:1:1 2:N:0:1"),
            Some((&b"M00123:8:000:1:1101:1:1"[..], 2))
        );
        assert_eq!(parse_mate(b"read7"), None);
        assert_eq!(parse_mate(b"/1"), None);
        assert_eq!(parse_mate(b""), None);
    }

    #[test]
    fn test_pair_tracker() {
        let mut tracker = PairTracker::default();
        tracker.push(b"a/1");
        tracker.push(b"a/2");
        tracker.push(b"b/1");
        tracker.push(b"b/2");
        assert!(tracker.interleaved());

        let mut mismatched = PairTracker::default();
        mismatched.push(b"a/1");
        mismatched.push(b"b/2");
        assert!(!mismatched.interleaved());

        let mut dangling = PairTracker::default();
        dangling.push(b"a/1");
        dangling.push(b"a/2");
        dangling.push(b"b/1");
        assert!(dangling.interleaved());
        dangling.end_of_input();
        assert!(!dangling.interleaved());
    }

    #[test]
    fn test_fasta_multiline_stats() {
        let stats = run(FileType::Fasta, b">a\nACGT\nGGCC\n>b\nAT\n").unwrap();
        assert_eq!(stats.records, 2);
        assert!(stats.multiline);
        assert_eq!(stats.est_avg_len, 5.0);
        // 6 of 10 called bases are G or C
        assert!((stats.est_gc - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_fasta_empty_record_counts() {
        let stats = run(FileType::Fasta, b">a\n>b\nACGT\n").unwrap();
        assert_eq!(stats.records, 2);
        assert_eq!(stats.est_avg_len, 2.0);
    }

    #[test]
    fn test_fastq_quality_starting_with_at() {
        let data = b"@r1\nACGT\n+\n@III\n@r2\nGG\n+\n@@\n";
        let stats = run(FileType::Fastq, data).unwrap();
        assert_eq!(stats.records, 2);
        assert!(!stats.multiline);
        assert_eq!(stats.est_avg_len, 3.0);
    }

    #[test]
    fn test_fastq_truncated() {
        let err = run(FileType::Fastq, b"@r1\nACGT\n+\nIIII\n@r2\nGG\n").unwrap_err();
        assert!(matches!(err, SniffError::MalformedFastq { .. }));
    }

    #[test]
    fn test_amino_acid_suppresses_nucleotide_flags() {
        let stats = run(FileType::Fasta, b">p\nMKVLAAGIVGLLLAQEW-\n").unwrap();
        assert_eq!(stats.seq_type, SeqType::Aa);
        assert!(!stats.has_gaps);
        assert!(!stats.has_iupac);
    }

    #[test]
    fn test_sparse_ambiguity_stays_dna() {
        let stats = run(FileType::Fasta, b">a\nACGTACGTACGTACGTACGR\n").unwrap();
        assert_eq!(stats.seq_type, SeqType::Dna);
        assert!(stats.has_iupac);
        assert!(!stats.has_unknowns);
    }

    #[test]
    fn test_only_gaps_is_unknown() {
        let stats = run(FileType::Fasta, b">a\n----\n").unwrap();
        assert_eq!(stats.seq_type, SeqType::Unknown);
        assert!(!stats.has_gaps);
    }

    #[test]
    fn test_record_limit() {
        let options = SniffOptions {
            max_records: 2,
            ..SniffOptions::default()
        };
        let mut input: &[u8] = b">a\nAAAA\n>b\nAAAA\n>c\nAAAAAAAAAAAAAAAAAAAA\n";
        let stats = analyze(FileType::Fasta, &mut input, &options).unwrap();
        assert_eq!(stats.records, 2);
        assert_eq!(stats.est_avg_len, 4.0);
    }

    #[test]
    fn test_base_limit_stops_mid_record() {
        let options = SniffOptions {
            max_bases: 8,
            ..SniffOptions::default()
        };
        let mut input: &[u8] = b">a\nACGT\nACGT\nACGT\n>b\nGGGG\n";
        let stats = analyze(FileType::Fasta, &mut input, &options).unwrap();
        assert_eq!(stats.records, 1);
        assert_eq!(stats.est_avg_len, 8.0);
        assert!((stats.est_gc - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_fastq_multiline_stats() {
        let data = b"@r1\nACGT\nGC\n+\nIIII\nII\n@r2\nAT\n+\nII\n";
        let stats = run(FileType::Fastq, data).unwrap();
        assert_eq!(stats.records, 2);
        assert!(stats.multiline);
        assert_eq!(stats.est_avg_len, 4.0);
    }

    #[test]
    fn test_dot_gaps() {
        let stats = run(FileType::Fasta, b">a\nAC..GT\n").unwrap();
        assert_eq!(stats.seq_type, SeqType::Dna);
        assert!(stats.has_gaps);
        assert_eq!(stats.est_avg_len, 6.0);
        assert!((stats.est_gc - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_long_lines_span_fragments() {
        let len = 3 * FRAGMENT_LEN as usize + 17;
        let seq = "ACGT".repeat(len / 4 + 1)[..len].to_string();
        let qual = "I".repeat(len);
        let data = format!("@r1/1\n{seq}\n+\n{qual}\n@r1/2\n{seq}\n+\n{qual}\n");
        let stats = run(FileType::Fastq, data.as_bytes()).unwrap();
        assert_eq!(stats.records, 2);
        assert!(!stats.multiline);
        assert_eq!(stats.est_avg_len, len as f64);
        assert!(stats.interleaved);

        let fasta = format!(">chr1 {}\n{seq}\n>chr2\nGG\n", "x".repeat(len));
        let stats = run(FileType::Fasta, fasta.as_bytes()).unwrap();
        assert_eq!(stats.records, 2);
        assert!(!stats.multiline);
        assert_eq!(stats.est_avg_len, (len + 2) as f64 / 2.0);
    }

    #[test]
    fn test_base_limit_reads_a_bounded_prefix() {
        let total = 64 * 1024 * 1024;
        let source = std::io::Cursor::new(b">chr1\n".to_vec()).chain(std::io::repeat(b'A').take(total));
        let mut input = std::io::BufReader::new(source);
        let options = SniffOptions {
            max_bases: 1000,
            ..SniffOptions::default()
        };
        let stats = analyze(FileType::Fasta, &mut input, &options).unwrap();
        assert_eq!(stats.records, 1);
        assert!(stats.est_avg_len <= FRAGMENT_LEN as f64);
        assert!(input.into_inner().into_inner().1.limit() > total - 2 * FRAGMENT_LEN);
    }

    #[test]
    fn test_fastq_quality_longer_than_sequence() {
        let len = FRAGMENT_LEN as usize;
        let data = format!("@r1\n{}\n+\n{}\n", "A".repeat(len), "I".repeat(len + 3));
        let err = run(FileType::Fastq, data.as_bytes()).unwrap_err();
        assert!(matches!(err, SniffError::MalformedFastq { .. }));
    }

    #[test]
    fn test_sample_bounds_keep_pairs() {
        let data = b"@a/1\nACGT\n+\nIIII\n@a/2\nACGT\n+\nIIII\n@b/1\nACGT\n+\nIIII\n@b/2\nACGT\n+\nIIII\n";
        for options in [
            SniffOptions {
                max_records: 3,
                ..SniffOptions::default()
            },
            SniffOptions {
                max_bases: 12,
                ..SniffOptions::default()
            },
        ] {
            let mut input: &[u8] = data;
            let stats = analyze(FileType::Fastq, &mut input, &options).unwrap();
            assert_eq!(stats.records, 3);
            assert!(stats.interleaved, "{:?}", options);
        }

        let mut input: &[u8] = b"@a/1\nACGT\n+\nIIII\n@a/2\nACGT\n+\nIIII\n@b/1\nACGT\n+\nIIII\n";
        let stats = analyze(FileType::Fastq, &mut input, &SniffOptions::default()).unwrap();
        assert!(!stats.interleaved);
    }
}
