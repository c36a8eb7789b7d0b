//! Camera identifiers and the ordered camera set an allocation reconciles.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One physical camera, named by a single uppercase ASCII letter (`A`, `B`, ...).
///
/// The letter is the fourth character of every frame identifier the camera issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CameraId(char);

impl CameraId {
    /// Returns `None` unless `letter` is an uppercase ASCII letter.
    pub fn new(letter: char) -> Option<Self> {
        letter.is_ascii_uppercase().then_some(Self(letter))
    }

    /// The camera letter.
    pub fn letter(self) -> char {
        self.0
    }
}

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CameraId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => {
                CameraId::new(c).ok_or_else(|| format!("invalid camera id '{s}'"))
            }
            _ => Err(format!("camera id must be a single letter, got '{s}'")),
        }
    }
}

impl TryFrom<String> for CameraId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CameraId> for String {
    fn from(value: CameraId) -> Self {
        value.0.to_string()
    }
}

/// The fixed, ordered collection of cameras one allocation must align.
///
/// Never empty and never holds the same camera twice. Iteration follows
/// the order the set was built in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraSet {
    cameras: Vec<CameraId>,
}

impl CameraSet {
    /// Builds a set, rejecting empty input and duplicates.
    pub fn new(cameras: impl IntoIterator<Item = CameraId>) -> Result<Self, String> {
        let mut out: Vec<CameraId> = Vec::new();
        for camera in cameras {
            if out.contains(&camera) {
                return Err(format!("duplicate camera '{camera}'"));
            }
            out.push(camera);
        }
        if out.is_empty() {
            return Err("camera set is empty".to_string());
        }
        Ok(Self { cameras: out })
    }

    /// Builds a set from camera letters, e.g. `"ABCD"`.
    pub fn from_letters(letters: &str) -> Result<Self, String> {
        let cameras = letters
            .chars()
            .map(|c| CameraId::new(c).ok_or_else(|| format!("invalid camera id '{c}'")))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(cameras)
    }

    /// The four spectrograph cameras `A`..`D` of the reference deployment.
    pub fn reference() -> Self {
        Self {
            cameras: ['A', 'B', 'C', 'D'].into_iter().map(CameraId).collect(),
        }
    }

    /// Cameras in set order.
    pub fn iter(&self) -> impl Iterator<Item = CameraId> + '_ {
        self.cameras.iter().copied()
    }

    /// Number of cameras.
    pub fn len(&self) -> usize {
        self.cameras.len()
    }

    /// Always false; kept for API symmetry with collections.
    pub fn is_empty(&self) -> bool {
        self.cameras.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camera_id_validation() {
        assert!(CameraId::new('A').is_some());
        assert!(CameraId::new('a').is_none());
        assert!(CameraId::new('1').is_none());
        assert!("AB".parse::<CameraId>().is_err());
        assert_eq!("D".parse::<CameraId>().unwrap().letter(), 'D');
    }

    #[test]
    fn test_camera_set_rejects_duplicates_and_empty() {
        assert!(CameraSet::from_letters("ABA").is_err());
        assert!(CameraSet::from_letters("").is_err());
        assert!(CameraSet::from_letters("Ab").is_err());
    }

    #[test]
    fn test_camera_set_keeps_order() {
        let set = CameraSet::from_letters("DBA").unwrap();
        let letters: String = set.iter().map(CameraId::letter).collect();
        assert_eq!(letters, "DBA");
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_reference_set() {
        assert_eq!(CameraSet::reference(), CameraSet::from_letters("ABCD").unwrap());
    }

    #[test]
    fn test_camera_id_serde() {
        let id: CameraId = serde_json::from_str("\"B\"").unwrap();
        assert_eq!(id.letter(), 'B');
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"B\"");
        assert!(serde_json::from_str::<CameraId>("\"b\"").is_err());
    }
}
