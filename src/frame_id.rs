//! Frame identifier codec.
//!
//! Gen2 frame identifiers are 12 ASCII characters:
//!
//! ```text
//! PFS A 000123 45
//! ^^^ ^ ^^^^^^ ^^
//!  |  |   |     +-- subframe index, 00..99
//!  |  |   +-------- visit number, 6 decimal digits
//!  |  +------------ camera letter
//!  +--------------- instrument code
//! ```
//!
//! Per camera, successive identifiers advance the subframe by one and roll the
//! visit number over every [`SUBFRAMES_PER_VISIT`] frames.

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::camera::CameraId;
use crate::error::VisitError;

/// Total length of a frame identifier.
pub const FRAME_ID_LEN: usize = 12;

/// Frames in one visit block of one camera.
pub const SUBFRAMES_PER_VISIT: u32 = 100;

/// Largest visit number that fits the 6-digit field.
pub const MAX_VISIT: u32 = 999_999;

/// Largest subframe index.
pub const LAST_SUBFRAME: u8 = 99;

const PREFIX_LEN: usize = 4;
const VISIT_END: usize = PREFIX_LEN + 6;

/// Frames produced by the instrument's own cameras.
static INSTRUMENT_FRAME: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"^PF[JLXIASPF][ABCD]").unwrap()
});

/// A decoded frame identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FrameId {
    prefix: String,
    visit: u32,
    subframe: u8,
}

impl FrameId {
    /// Builds the identifier for `camera` of `instrument_code`.
    ///
    /// Returns `None` if the code is not three uppercase letters or the
    /// numbers do not fit their fields.
    pub fn new(instrument_code: &str, camera: CameraId, visit: u32, subframe: u8) -> Option<Self> {
        if !is_valid_instrument_code(instrument_code) || visit > MAX_VISIT || subframe > LAST_SUBFRAME
        {
            return None;
        }
        Some(Self {
            prefix: format!("{instrument_code}{camera}"),
            visit,
            subframe,
        })
    }

    /// Instrument code followed by the camera letter, e.g. `PFSA`.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Visit number field.
    pub fn visit(&self) -> u32 {
        self.visit
    }

    /// Subframe index field.
    pub fn subframe(&self) -> u8 {
        self.subframe
    }

    /// True when this frame opens a visit block.
    pub fn is_block_start(&self) -> bool {
        self.subframe == 0
    }

    /// The identifier the same camera issues after this one.
    pub fn successor(&self) -> Option<Self> {
        let (visit, subframe) = if self.subframe == LAST_SUBFRAME {
            (self.visit.checked_add(1)?, 0)
        } else {
            (self.visit, self.subframe + 1)
        };
        (visit <= MAX_VISIT).then(|| Self {
            prefix: self.prefix.clone(),
            visit,
            subframe,
        })
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:06}{:02}", self.prefix, self.visit, self.subframe)
    }
}

impl FromStr for FrameId {
    type Err = VisitError;

    fn from_str(frame: &str) -> Result<Self, Self::Err> {
        let malformed = |reason: &str| VisitError::MalformedIdentifier {
            frame: frame.to_string(),
            reason: reason.to_string(),
        };

        if !frame.is_ascii() {
            return Err(malformed("non-ASCII characters"));
        }
        if frame.len() != FRAME_ID_LEN {
            return Err(malformed(&format!(
                "expected {FRAME_ID_LEN} characters, got {}",
                frame.len()
            )));
        }

        let prefix = &frame[..PREFIX_LEN];
        if !prefix.bytes().all(|b| b.is_ascii_uppercase()) {
            return Err(malformed("instrument/camera code must be uppercase letters"));
        }

        let visit_digits = &frame[PREFIX_LEN..VISIT_END];
        let subframe_digits = &frame[VISIT_END..];
        if !visit_digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed("visit field is not decimal"));
        }
        if !subframe_digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed("subframe field is not decimal"));
        }

        let visit = visit_digits
            .parse()
            .map_err(|_| malformed("visit field is not decimal"))?;
        let subframe = subframe_digits
            .parse()
            .map_err(|_| malformed("subframe field is not decimal"))?;

        Ok(Self {
            prefix: prefix.to_string(),
            visit,
            subframe,
        })
    }
}

/// Decodes `frame` into `(visit, subframe)`.
pub fn decode(frame: &str) -> Result<(u32, u8), VisitError> {
    let id: FrameId = frame.parse()?;
    Ok((id.visit, id.subframe))
}

/// True for three uppercase ASCII letters, e.g. `PFS`.
pub fn is_valid_instrument_code(code: &str) -> bool {
    code.len() == 3 && code.bytes().all(|b| b.is_ascii_uppercase())
}

/// Exposure identifier tagging a whole visit, e.g. `PFSE00012300`.
pub fn exposure_id(instrument_code: &str, visit: u32) -> String {
    format!("{instrument_code}E{visit:06}00")
}

/// Frame identifier used to archive files belonging to a visit, e.g. `PFSF00012300`.
pub fn visit_frame_id(instrument_code: &str, visit: u32) -> String {
    format!("{instrument_code}F{visit:06}00")
}

/// Visit number of a frame issued under `instrument_code`, if it is one.
pub fn visit_from_frame_id(instrument_code: &str, frame: &str) -> Option<u32> {
    if !frame.starts_with(instrument_code) {
        return None;
    }
    frame.parse::<FrameId>().ok().map(|id| id.visit)
}

/// True for frames produced by the instrument's own cameras.
pub fn is_instrument_frame(frame: &str) -> bool {
    INSTRUMENT_FRAME.is_match(frame)
}
