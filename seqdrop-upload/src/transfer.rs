//! Chunked transfer of one local file into an [`ObjectStore`].

use std::future::Future;
use std::path::Path;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::sync::CancellationToken;

use crate::error::StorageError;
use crate::storage::{ObjectStore, UploadedPart};

/// Upper bound on parts in one S3 multipart upload.
pub const MAX_PARTS: u64 = 10_000;

/// How a file of a given size is split into parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferPlan {
    pub file_size: u64,
    pub part_size: u64,
}

impl TransferPlan {
    /// Use `preferred_part_size` unless that would need more than
    /// [`MAX_PARTS`] parts, in which case parts grow to fit.
    pub fn new(file_size: u64, preferred_part_size: u64) -> Self {
        let preferred = preferred_part_size.max(1);
        let part_size = preferred.max(file_size.div_ceil(MAX_PARTS));
        Self {
            file_size,
            part_size,
        }
    }

    /// Files that fit in one part go up in a single request.
    pub fn is_single_request(&self) -> bool {
        self.file_size <= self.part_size
    }

    pub fn part_count(&self) -> u64 {
        self.file_size.div_ceil(self.part_size).max(1)
    }

    /// Byte offset and length of the zero-based part `index`.
    pub fn part_range(&self, index: u64) -> (u64, u64) {
        let offset = index * self.part_size;
        let len = self.part_size.min(self.file_size.saturating_sub(offset));
        (offset, len)
    }
}

/// Run `operation` unless `cancel` fires first. Dropping the operation
/// aborts the in-flight request.
async fn cancellable<T>(
    cancel: &CancellationToken,
    operation: impl Future<Output = Result<T, StorageError>>,
) -> Result<T, StorageError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(StorageError::Cancelled),
        result = operation => result,
    }
}

/// Upload `path` to `bucket/key`, reporting each accepted chunk's size to
/// `on_bytes`.
///
/// A multipart upload that fails, is cancelled, or cannot be completed is
/// aborted so the store does not keep orphaned parts. Completion itself is
/// not raced against `cancel`: once it is sent the upload either lands whole
/// or is aborted.
pub async fn upload_file(
    store: &dyn ObjectStore,
    path: &Path,
    bucket: &str,
    key: &str,
    plan: TransferPlan,
    cancel: &CancellationToken,
    mut on_bytes: impl FnMut(u64),
) -> Result<(), StorageError> {
    if plan.is_single_request() {
        if cancel.is_cancelled() {
            return Err(StorageError::Cancelled);
        }
        let body = fs::read(path).await?;
        let len = body.len() as u64;
        cancellable(cancel, store.put_object(bucket, key, body)).await?;
        on_bytes(len);
        tracing::debug!("stored {} bytes in a single request", len);
        return Ok(());
    }

    let upload_id = cancellable(cancel, store.create_multipart_upload(bucket, key)).await?;
    tracing::info!(
        "started multipart upload: {} parts of {} bytes",
        plan.part_count(),
        plan.part_size
    );

    let outcome =
        match upload_parts(store, path, bucket, key, &upload_id, plan, cancel, &mut on_bytes).await {
            Ok(_) if cancel.is_cancelled() => Err(StorageError::Cancelled),
            Ok(parts) => {
                store
                    .complete_multipart_upload(bucket, key, &upload_id, &parts)
                    .await
            }
            Err(e) => Err(e),
        };

    if let Err(e) = &outcome {
        tracing::warn!("aborting multipart upload {}: {}", upload_id, e);
        if let Err(abort_err) = store.abort_multipart_upload(bucket, key, &upload_id).await {
            tracing::warn!("could not abort multipart upload {}: {}", upload_id, abort_err);
        }
    }
    outcome
}

#[allow(clippy::too_many_arguments)]
async fn upload_parts(
    store: &dyn ObjectStore,
    path: &Path,
    bucket: &str,
    key: &str,
    upload_id: &str,
    plan: TransferPlan,
    cancel: &CancellationToken,
    on_bytes: &mut impl FnMut(u64),
) -> Result<Vec<UploadedPart>, StorageError> {
    let mut file = fs::File::open(path).await?;
    let mut parts = Vec::with_capacity(plan.part_count() as usize);

    for index in 0..plan.part_count() {
        if cancel.is_cancelled() {
            return Err(StorageError::Cancelled);
        }

        let (offset, len) = plan.part_range(index);
        let mut chunk = vec![0u8; len as usize];
        file.seek(std::io::SeekFrom::Start(offset)).await?;
        file.read_exact(&mut chunk).await?;

        let part_number = (index + 1) as i32;
        let part = cancellable(
            cancel,
            store.upload_part(bucket, key, upload_id, part_number, chunk),
        )
        .await?;
        on_bytes(len);
        tracing::debug!("uploaded part {} ({} bytes)", part_number, len);
        parts.push(part);
    }

    Ok(parts)
}
