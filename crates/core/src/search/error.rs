use thiserror::Error;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("cannot update a finished job (step {step})")]
    JobFinished { step: usize },

    #[error(
        "input beam count {actual} must equal beam count {expected} \
         (logits have {rows} rows for a batch of {batch_size})"
    )]
    BeamCountMismatch {
        expected: usize,
        actual: usize,
        rows: usize,
        batch_size: usize,
    },

    #[error("logits width {actual} does not match vocabulary size {expected}")]
    VocabMismatch { expected: usize, actual: usize },

    #[error("candle error: {0}")]
    Candle(#[from] candle_core::Error),
}

impl SearchError {
    /// Configuration errors raised before any job state is touched.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, SearchError::InvalidArgument(_))
    }

    /// Contract breaches by the caller of a running job.
    pub fn is_precondition_violation(&self) -> bool {
        matches!(
            self,
            SearchError::JobFinished { .. }
                | SearchError::BeamCountMismatch { .. }
                | SearchError::VocabMismatch { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, SearchError>;
