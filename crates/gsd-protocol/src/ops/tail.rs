//! Log tail operation types.

use serde::{Deserialize, Serialize};

/// Default number of lines returned by a tail request.
pub const DEFAULT_MAX_LINES: usize = 200;

/// Upper bound on `max_lines`.
pub const MAX_MAX_LINES: usize = 2000;

/// Tail request payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TailRequest {
    /// The job ID to tail.
    pub job_id: String,
    /// Maximum number of trailing lines to return.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_lines: Option<usize>,
}

impl TailRequest {
    /// Effective line limit, clamped to `[1, MAX_MAX_LINES]`.
    pub fn effective_max_lines(&self) -> usize {
        self.max_lines
            .unwrap_or(DEFAULT_MAX_LINES)
            .clamp(1, MAX_MAX_LINES)
    }
}

/// Tail response payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TailResponse {
    pub job_id: String,
    /// Trailing log lines, oldest first.
    pub lines: Vec<String>,
    /// True if older lines were dropped.
    pub truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_note: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_lines_clamped() {
        let req = |n| TailRequest { job_id: "a".into(), max_lines: n };
        assert_eq!(req(None).effective_max_lines(), DEFAULT_MAX_LINES);
        assert_eq!(req(Some(0)).effective_max_lines(), 1);
        assert_eq!(req(Some(50_000)).effective_max_lines(), MAX_MAX_LINES);
        assert_eq!(req(Some(7)).effective_max_lines(), 7);
    }
}
