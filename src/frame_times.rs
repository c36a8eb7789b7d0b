//! Slow frame-request report.
//!
//! Scans frame-source logs for `(reqframes)` entries. A line containing
//! `reqframes num=` opens a request; the next `(reqframes)` line closes it. Lines look
//! like:
//!
//! ```text
//! 2023-05-02 21:14:03,250 | I | PFS.py:254 (reqframes) reqframes num=1 type='A'
//! 2023-05-02 21:14:09,871 | I | PFS.py:258 (reqframes) framelist: ['PFSA01234500']
//! ```

use std::time::Duration;

use chrono::NaiveDateTime;

use crate::error::{AppError, AppResult};

/// Lines of interest carry this tag.
const REQFRAMES_TAG: &str = "(reqframes)";
/// The opening line of a request carries this text.
const REQUEST_START: &str = "reqframes num=";

/// Default reporting threshold.
pub const DEFAULT_THRESHOLD: Duration = Duration::from_secs(5);

/// A frame request slower than the threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct SlowRequest {
    /// When the request was issued
    pub started: NaiveDateTime,
    /// How long it took, in seconds
    pub seconds: f64,
}

impl std::fmt::Display for SlowRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.started.format("%Y-%m-%d %H:%M:%S"), self.seconds)
    }
}

/// Returns the requests in `lines` that took longer than `threshold`.
///
/// # Errors
///
/// [`AppError::LogParse`] for a tagged line without a parseable timestamp.
pub fn slow_requests<I, S>(lines: I, threshold: Duration) -> AppResult<Vec<SlowRequest>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let threshold = threshold.as_secs_f64();
    let mut started: Option<NaiveDateTime> = None;
    let mut slow = Vec::new();

    for line in lines {
        let line = line.as_ref();
        if !line.contains(REQFRAMES_TAG) {
            continue;
        }
        let t = parse_timestamp(line)?;

        if line.contains(REQUEST_START) {
            started = Some(t);
        } else if let Some(t0) = started.take() {
            let seconds = (t - t0).num_milliseconds() as f64 / 1000.0;
            if seconds > threshold {
                slow.push(SlowRequest {
                    started: t0,
                    seconds,
                });
            }
        }
    }

    Ok(slow)
}

fn parse_timestamp(line: &str) -> AppResult<NaiveDateTime> {
    let (ts, _) = line
        .split_once('|')
        .ok_or_else(|| AppError::LogParse(format!("no timestamp field: {line}")))?;
    let ts = ts.trim().replacen(',', ".", 1);
    NaiveDateTime::parse_from_str(&ts, "%Y-%m-%d %H:%M:%S%.f")
        .map_err(|e| AppError::LogParse(format!("failed to parse date '{ts}': {e}")))
}
