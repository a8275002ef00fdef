use std::sync::Arc;

use common::helper::error_chain_fmt;
use futures::future::join_all;
use tokio::sync::Mutex;
use tracing::{debug, error, info, info_span, Instrument};

use crate::{
    configuration::UploadSettings,
    domain::entities::point::{Batch, Payload, PointId, Vector},
    ports::points_repository::{PointsRepository, PointsRepositoryError},
};

pub const DEFAULT_BATCH_SIZE: usize = 64;

/// Options of a bulk upload
#[derive(Debug, Clone)]
pub struct UploadOptions {
    /// Maximum number of points per request, the last batch may be smaller
    pub batch_size: usize,
    /// Number of batches in flight at the same time
    pub parallelism: usize,
    /// Makes the server apply each batch before answering
    pub wait: bool,
    /// First id assigned when no ids are given, the point at position `i` gets `id_offset + i`
    pub id_offset: u64,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            parallelism: 1,
            wait: false,
            id_offset: 0,
        }
    }
}

impl From<&UploadSettings> for UploadOptions {
    fn from(settings: &UploadSettings) -> Self {
        Self {
            batch_size: settings.batch_size,
            parallelism: settings.parallelism,
            wait: settings.wait,
            ..Default::default()
        }
    }
}

type BoxedIterator<'a, T> = Box<dyn Iterator<Item = T> + Send + 'a>;
type BoxedError = Box<dyn std::error::Error + Send + Sync>;

/// The points to upload, as lazily pulled sequences
///
/// Nothing is read before the upload starts, and each worker only holds the batch it is sending.
/// Payloads and ids, when given, are consumed in lockstep with the vectors:
/// the n-th payload and the n-th id belong to the n-th vector.
pub struct UploadInput<'a> {
    vectors: BoxedIterator<'a, Result<Vector, BoxedError>>,
    payloads: Option<BoxedIterator<'a, Payload>>,
    ids: Option<BoxedIterator<'a, PointId>>,
}

impl<'a> UploadInput<'a> {
    pub fn new<V>(vectors: V) -> Self
    where
        V: IntoIterator<Item = Vector>,
        V::IntoIter: Send + 'a,
    {
        Self {
            vectors: Box::new(vectors.into_iter().map(Ok)),
            payloads: None,
            ids: None,
        }
    }

    /// Vectors read from a source that can fail, like a file
    ///
    /// The upload stops at the first unreadable vector.
    pub fn from_fallible<V, E>(vectors: V) -> Self
    where
        V: IntoIterator<Item = Result<Vector, E>>,
        V::IntoIter: Send + 'a,
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            vectors: Box::new(
                vectors
                    .into_iter()
                    .map(|vector| vector.map_err(|e| Box::new(e) as BoxedError)),
            ),
            payloads: None,
            ids: None,
        }
    }

    pub fn with_payloads<P>(mut self, payloads: P) -> Self
    where
        P: IntoIterator<Item = Payload>,
        P::IntoIter: Send + 'a,
    {
        self.payloads = Some(Box::new(payloads.into_iter()));
        self
    }

    pub fn with_ids<I>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = PointId>,
        I::IntoIter: Send + 'a,
    {
        self.ids = Some(Box::new(ids.into_iter()));
        self
    }
}

/// Positional reader over the upload input, slicing it into batches
///
/// Shared by the workers behind a mutex, so each point is handed out exactly once.
pub struct BatchCursor<'a> {
    input: UploadInput<'a>,
    batch_size: usize,
    id_offset: u64,
    position: usize,
    next_batch_index: usize,
    exhausted: bool,
}

impl<'a> BatchCursor<'a> {
    pub fn new(input: UploadInput<'a>, batch_size: usize, id_offset: u64) -> Self {
        Self {
            input,
            batch_size,
            id_offset,
            position: 0,
            next_batch_index: 0,
            exhausted: false,
        }
    }

    /// Pulls the next batch and its index
    ///
    /// Returns `None` once the vectors are exhausted.
    /// A payloads or ids sequence not matching the vectors length ends the cursor with an error,
    /// the points pulled for the current batch are then not handed out.
    pub fn next_batch(&mut self) -> Option<Result<(usize, Batch), BatchCursorError>> {
        if self.exhausted {
            return None;
        }

        let offset = self.position;
        let mut ids = Vec::with_capacity(self.batch_size);
        let mut vectors = Vec::with_capacity(self.batch_size);
        let mut payloads = self
            .input
            .payloads
            .as_ref()
            .map(|_| Vec::with_capacity(self.batch_size));

        while vectors.len() < self.batch_size {
            let vector = match self.input.vectors.next() {
                Some(Ok(vector)) => vector,
                Some(Err(source)) => {
                    self.exhausted = true;
                    return Some(Err(BatchCursorError::UnreadableVector {
                        position: self.position,
                        source,
                    }));
                }
                None => {
                    if let Err(error) = self.check_no_leftover() {
                        self.exhausted = true;
                        return Some(Err(error));
                    }
                    break;
                }
            };

            if let (Some(source), Some(payloads)) = (self.input.payloads.as_mut(), payloads.as_mut())
            {
                match source.next() {
                    Some(payload) => payloads.push(payload),
                    None => {
                        self.exhausted = true;
                        return Some(Err(BatchCursorError::InputLengthMismatch {
                            input: "payloads",
                            position: self.position,
                        }));
                    }
                }
            }

            let id = match self.input.ids.as_mut() {
                Some(source) => match source.next() {
                    Some(id) => id,
                    None => {
                        self.exhausted = true;
                        return Some(Err(BatchCursorError::InputLengthMismatch {
                            input: "ids",
                            position: self.position,
                        }));
                    }
                },
                None => PointId::Num(self.id_offset + self.position as u64),
            };

            ids.push(id);
            vectors.push(vector);
            self.position += 1;
        }

        if vectors.is_empty() {
            self.exhausted = true;
            return None;
        }

        let batch_index = self.next_batch_index;
        self.next_batch_index += 1;

        Some(Ok((
            batch_index,
            Batch {
                offset,
                ids,
                vectors,
                payloads,
            },
        )))
    }

    /// Number of points handed out so far
    pub fn position(&self) -> usize {
        self.position
    }

    fn check_no_leftover(&mut self) -> Result<(), BatchCursorError> {
        if let Some(payloads) = self.input.payloads.as_mut() {
            if payloads.next().is_some() {
                return Err(BatchCursorError::InputLengthMismatch {
                    input: "payloads",
                    position: self.position,
                });
            }
        }
        if let Some(ids) = self.input.ids.as_mut() {
            if ids.next().is_some() {
                return Err(BatchCursorError::InputLengthMismatch {
                    input: "ids",
                    position: self.position,
                });
            }
        }
        Ok(())
    }
}

/// Uploads sequences of points to a collection in batches, with a bounded number of concurrent requests
///
/// Failed batches are neither retried nor rolled back: upserts being keyed by id,
/// re-submitting the ids of `BatchFailure` is the way to recover.
pub struct BatchUploader<R> {
    repository: Arc<R>,
    options: UploadOptions,
}

impl<R: PointsRepository> BatchUploader<R> {
    pub fn new(repository: Arc<R>, options: UploadOptions) -> Self {
        Self {
            repository,
            options,
        }
    }

    pub fn options(&self) -> &UploadOptions {
        &self.options
    }

    #[tracing::instrument(
        name = "Uploading points in batches",
        skip(self, input),
        fields(
            batch_size = self.options.batch_size,
            parallelism = self.options.parallelism,
            wait = self.options.wait,
        )
    )]
    pub async fn upload(
        &self,
        collection_name: &str,
        input: UploadInput<'_>,
    ) -> Result<UploadSummary, BatchUploadError> {
        if self.options.batch_size == 0 {
            return Err(BatchUploadError::InvalidOption(
                "batch_size must be greater than 0".into(),
            ));
        }
        if self.options.parallelism == 0 {
            return Err(BatchUploadError::InvalidOption(
                "parallelism must be greater than 0".into(),
            ));
        }

        let cursor = Mutex::new(BatchCursor::new(
            input,
            self.options.batch_size,
            self.options.id_offset,
        ));

        let workers = (0..self.options.parallelism).map(|worker_id| {
            self.run_worker(collection_name, &cursor)
                .instrument(info_span!("Upload worker", worker_id))
        });

        let mut report = UploadReport::default();
        for outcome in join_all(workers).await {
            report.merge(outcome);
        }

        info!(
            batches = report.batches,
            points = report.points,
            failed_batches = report.failures.len(),
            "Upload finished"
        );

        if let Some(source) = report.input_error.take() {
            return Err(BatchUploadError::InvalidInput { source, report });
        }
        if !report.failures.is_empty() {
            return Err(BatchUploadError::PartialFailure(report));
        }

        Ok(UploadSummary {
            batches: report.batches,
            points: report.points,
        })
    }

    /// Sends batches pulled from the shared cursor until it is exhausted
    async fn run_worker(
        &self,
        collection_name: &str,
        cursor: &Mutex<BatchCursor<'_>>,
    ) -> UploadReport {
        let mut report = UploadReport::default();

        loop {
            // The lock is released before sending, other workers keep pulling batches
            let next = cursor.lock().await.next_batch();

            let (batch_index, batch) = match next {
                None => break,
                Some(Ok(next)) => next,
                Some(Err(error)) => {
                    error!(?error, "Stopping upload on invalid input");
                    report.input_error = Some(error);
                    break;
                }
            };

            let offset = batch.offset;
            let len = batch.len();
            // Kept to report which points to re-submit if the batch fails
            let ids = batch.ids.clone();

            debug!(batch_index, offset, len, "Sending batch");

            match self
                .repository
                .upsert_batch(collection_name, batch, self.options.wait)
                .await
            {
                Ok(result) => {
                    debug!(batch_index, ?result, "Batch upserted");
                    report.batches += 1;
                    report.points += len;
                }
                Err(error) => {
                    error!(batch_index, offset, len, ?error, "Failed to upsert batch");
                    report.failures.push(BatchFailure {
                        batch_index,
                        offset,
                        ids,
                        error,
                    });
                }
            }
        }

        report
    }
}

/// Outcome of a fully successful upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadSummary {
    pub batches: usize,
    pub points: usize,
}

/// Outcome of an upload with failures: what was applied and what was not
#[derive(Debug, Default)]
pub struct UploadReport {
    /// Successfully upserted batches
    pub batches: usize,
    /// Successfully upserted points
    pub points: usize,
    pub failures: Vec<BatchFailure>,
    input_error: Option<BatchCursorError>,
}

impl UploadReport {
    fn merge(&mut self, other: UploadReport) {
        self.batches += other.batches;
        self.points += other.points;
        self.failures.extend(other.failures);
        if self.input_error.is_none() {
            self.input_error = other.input_error;
        }
    }
}

#[derive(Debug)]
pub struct BatchFailure {
    pub batch_index: usize,
    /// Position of the first point of the batch in the input
    pub offset: usize,
    pub ids: Vec<PointId>,
    pub error: PointsRepositoryError,
}

#[derive(thiserror::Error)]
pub enum BatchCursorError {
    #[error("Input {input} ended before or after the vectors, at position {position}")]
    InputLengthMismatch {
        input: &'static str,
        position: usize,
    },
    #[error("Vector at position {position} could not be read")]
    UnreadableVector {
        position: usize,
        #[source]
        source: BoxedError,
    },
}

impl std::fmt::Debug for BatchCursorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

#[derive(thiserror::Error)]
pub enum BatchUploadError {
    #[error("Invalid upload option: {0}")]
    InvalidOption(String),
    #[error("Upload stopped on invalid input after {} points", .report.points)]
    InvalidInput {
        #[source]
        source: BatchCursorError,
        report: UploadReport,
    },
    #[error(
        "{} batches failed, {} batches ({} points) were upserted",
        .0.failures.len(),
        .0.batches,
        .0.points
    )]
    PartialFailure(UploadReport),
}

impl std::fmt::Debug for BatchUploadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}
