use super::*;

/// Crate-wide error type.
///
/// Mirrors the shape of `stratum::error::InternalError` in its sibling
/// session-layer crate: one flat enum, `snafu`-derived, with context
/// selectors at every fallible call site instead of `.map_err` closures.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("malformed share: {reason}"))]
    MalformedShare { reason: String },

    #[snafu(display("stale or unknown job {job_id}"))]
    StaleOrUnknownJob { job_id: JobId },

    #[snafu(display("ntime {ntime} out of range for job {job_id}"))]
    NtimeOutOfRange { job_id: JobId, ntime: Ntime },

    #[snafu(display("duplicate share for job {job_id}"))]
    Duplicate { job_id: JobId },

    #[snafu(display("share difficulty below required minimum"))]
    LowDifficulty,

    #[snafu(display("invalid template: {reason}"))]
    InvalidTemplate { reason: String },

    #[snafu(display("node error: {message}"))]
    NodeError { message: String },

    #[snafu(display("hex decode error: {source}"))]
    Hex { source: hex::FromHexError },

    #[snafu(display("consensus decode error: {source}"))]
    Consensus {
        source: bitcoin::consensus::encode::Error,
    },

    #[snafu(display("io error: {source}"))]
    Io { source: std::io::Error },

    #[snafu(display("json error: {source}"))]
    Json { source: serde_json::Error },

    #[snafu(display("http error: {source}"))]
    Http { source: reqwest::Error },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
