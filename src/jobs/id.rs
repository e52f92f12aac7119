//! Job id generation and validation.
//!
//! Job ids become file names, so every id arriving from outside is checked
//! against a strict character set before any path is derived from it.

use std::sync::OnceLock;

use gsd_protocol::JobKind;
use rand::Rng;
use regex_lite::Regex;

/// Unambiguous lowercase alphabet for generated ids (no 0/1/i/l/o).
pub const JOB_ID_ALPHABET: &[u8] = b"23456789abcdefghjkmnpqrstuvwxyz";

/// Number of random characters in a generated id.
pub const JOB_ID_RANDOM_LEN: usize = 16;

const JOB_ID_PATTERN: &str = r"^[A-Za-z0-9_-]{1,64}$";

fn job_id_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(JOB_ID_PATTERN).ok()).as_ref()
}

/// Whether `id` is acceptable as a job id from an external caller.
pub fn is_valid_job_id(id: &str) -> bool {
    job_id_regex().map_or(false, |re| re.is_match(id))
}

/// Fresh id such as `dl-7kq3m9x2hfr8wz4t`.
pub fn generate_job_id(kind: JobKind) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..JOB_ID_RANDOM_LEN)
        .map(|_| JOB_ID_ALPHABET[rng.gen_range(0..JOB_ID_ALPHABET.len())] as char)
        .collect();
    format!("{}-{}", kind.id_prefix(), suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_valid_and_prefixed() {
        for _ in 0..100 {
            let id = generate_job_id(JobKind::Flash);
            assert!(id.starts_with("fl-"));
            assert_eq!(id.len(), 3 + JOB_ID_RANDOM_LEN);
            assert!(is_valid_job_id(&id), "{}", id);
        }
        assert!(generate_job_id(JobKind::Download).starts_with("dl-"));
    }

    #[test]
    fn test_generated_ids_differ() {
        assert_ne!(generate_job_id(JobKind::Download), generate_job_id(JobKind::Download));
    }

    #[test]
    fn test_rejects_path_like_ids() {
        for bad in [
            "",
            "../etc/passwd",
            "a/b",
            "abc.json",
            "abc 123",
            "job\n",
            "\u{e9}t\u{e9}",
            &"a".repeat(65),
        ] {
            assert!(!is_valid_job_id(bad), "{:?} should be rejected", bad);
        }
    }

    #[test]
    fn test_accepts_legacy_ids() {
        assert!(is_valid_job_id("abc123"));
        assert!(is_valid_job_id("Job_2024-01"));
        assert!(is_valid_job_id(&"z".repeat(64)));
    }
}
