use reqwest::StatusCode;

/// Marker error for work that stopped because its job's token was cancelled.
///
/// It travels inside `anyhow::Error` chains like any other error, but callers
/// must never report it to the user. Use [`is_cancelled`] to recognize it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("operation cancelled")]
pub struct Cancelled;

pub fn is_cancelled(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.is::<Cancelled>())
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("redirect pattern not found")]
    PatternNotFound,
    #[error("unsupported cipher base {0}")]
    UnsupportedBase(u32),
    #[error("cipher segment {segment:?} is not a base-{base} numeral")]
    InvalidNumeral { segment: String, base: u32 },
    #[error("cipher value {value} is not a byte after removing offset {offset}")]
    InvalidCodePoint { value: u64, offset: u64 },
    #[error("decoded cipher text is not valid UTF-8")]
    InvalidUtf8,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("resolution service returned HTTP {0}")]
    Status(StatusCode),
    #[error("resolution service reported failure")]
    Rejected,
    #[error("resolution service response has no direct url")]
    MissingUrl,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobError {
    #[error("no series selected")]
    NoSeries,
    #[error("no episodes found")]
    NoEpisodes,
    #[error("no download option is available for every episode")]
    NotReady,
    #[error("download option {0:?} is not common to every episode")]
    UnknownOption(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArchiveError {
    #[error("archive entry {0:?} is still open")]
    EntryOpen(String),
    #[error("no archive entry is open")]
    NoEntryOpen,
    #[error("archive ended before it was finished")]
    Unfinished,
    #[error("archive writer closed before the archive was finished")]
    WriterClosed,
}

#[cfg(test)]
mod tests {
    use anyhow::Context;

    use super::{is_cancelled, Cancelled, JobError};

    #[test]
    fn test_is_cancelled_through_context() {
        let err = Err::<(), _>(Cancelled)
            .context("failed to fetch download options")
            .context("EP 3")
            .unwrap_err();
        assert!(is_cancelled(&err));

        let err = anyhow::Error::from(JobError::NoEpisodes).context("prepare");
        assert!(!is_cancelled(&err));
    }
}
