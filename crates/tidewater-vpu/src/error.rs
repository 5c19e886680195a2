use thiserror::Error;

/// Why a VPU run stopped before reaching quiescence.
#[derive(Debug, Error)]
pub enum ReductionError<E: std::error::Error + 'static> {
  /// A handler raised an error. The instance must be resumed from its last
  /// persisted soup.
  #[error("process error: {0}")]
  Process(#[source] E),

  /// The run did not become quiescent within the configured number of
  /// reductions.
  #[error("reduction limit of {limit} exceeded")]
  LimitExceeded { limit: usize },
}
