use crate::analyze::{SeqType, SequenceStats};
use crate::compression::Compression;
use crate::error::SniffError;
use crate::format::FileType;
use serde::Serialize;
use thiserror::Error;

/// Immutable result of sniffing one file.
///
/// When `file_type` is [`FileType::Bad`] only `compression` and
/// `error_message` carry information; the sequence fields hold defaults.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct SniffReport {
    pub compression: Compression,
    pub file_type: FileType,
    pub error_message: Option<String>,
    pub seq_type: SeqType,
    pub seq_multiline: bool,
    pub seq_has_gaps: bool,
    pub seq_has_lowercase: bool,
    pub seq_has_iupac: bool,
    pub seq_has_unknowns: bool,
    pub seq_est_avg_len: f64,
    pub seq_est_gc: f64,
    pub interleaved: bool,
}

/// Why a sniffed file may not be uploaded.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Rejection {
    #[error("{0}")]
    Bad(String),

    #[error("Amino acid FASTX files not supported")]
    AminoAcid,
}

impl SniffReport {
    pub(crate) fn bad(compression: Compression, error: &SniffError) -> Self {
        Self {
            compression,
            file_type: FileType::Bad,
            error_message: Some(error.to_string()),
            ..Self::default()
        }
    }

    pub(crate) fn from_stats(
        compression: Compression,
        file_type: FileType,
        stats: SequenceStats,
    ) -> Self {
        Self {
            compression,
            file_type,
            error_message: None,
            seq_type: stats.seq_type,
            seq_multiline: stats.multiline,
            seq_has_gaps: stats.has_gaps,
            seq_has_lowercase: stats.has_lowercase,
            seq_has_iupac: stats.has_iupac,
            seq_has_unknowns: stats.has_unknowns,
            seq_est_avg_len: stats.est_avg_len,
            seq_est_gc: stats.est_gc,
            interleaved: stats.interleaved,
        }
    }

    pub fn is_bad(&self) -> bool {
        self.file_type == FileType::Bad
    }

    /// Gate applied before an upload is allowed to start.
    pub fn acceptance(&self) -> Result<(), Rejection> {
        if self.is_bad() {
            let message = self
                .error_message
                .clone()
                .unwrap_or_else(|| SniffError::UnknownFormat.to_string());
            return Err(Rejection::Bad(message));
        }
        if self.seq_type == SeqType::Aa {
            return Err(Rejection::AminoAcid);
        }
        Ok(())
    }
}
