use thiserror::Error;

/// Failure of a single metadata source during one aggregation cycle.
///
/// These never escape the aggregator: they are logged, recorded in the
/// cycle results, and only matter to the reducer when every source fails.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SourceError {
    #[error("request failed: {0}")]
    Network(String),
    #[error("upstream returned HTTP {0}")]
    Status(u16),
    #[error("could not decode response: {0}")]
    Decode(String),
    #[error("response has no `{0}` field")]
    MissingField(&'static str),
    #[error("timed out after {0} ms")]
    Timeout(u64),
    #[error("all {0} endpoints failed")]
    Exhausted(usize),
}

/// Failure of one playback attempt, or of the whole candidate list.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PlaybackError {
    #[error("unsupported stream format for {0}")]
    Unsupported(String),
    #[error("media element error: {0}")]
    Element(String),
    #[error("adaptive stream fatal error: {0}")]
    AdaptiveFatal(String),
    #[error("no playable state after {0} s")]
    Timeout(u64),
    #[error("all {0} stream candidates failed")]
    Exhausted(usize),
}
