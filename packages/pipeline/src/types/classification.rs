//! Stage-2 classification records.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A Stage-2 classification track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Track {
    Fraud,
    Idv,
}

impl Track {
    pub const ALL: [Track; 2] = [Track::Fraud, Track::Idv];

    pub fn as_str(&self) -> &'static str {
        match self {
            Track::Fraud => "fraud",
            Track::Idv => "idv",
        }
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Track {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fraud" => Ok(Track::Fraud),
            "idv" => Ok(Track::Idv),
            other => Err(format!("unknown track '{other}' (expected fraud or idv)")),
        }
    }
}

/// Structured labels for one item on one track.
///
/// Keyed by (`post_id`, `track`); a later write for the same key replaces
/// the earlier one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationRecord {
    pub post_id: String,
    pub track: Track,
    pub is_relevant: bool,

    /// Track's primary closed-enum category (`fraud_type`, `verification_type`)
    pub primary: String,

    /// Secondary closed-enum fields by name
    pub attributes: BTreeMap<String, String>,

    /// 2 to 5 free-form tags
    pub tags: Vec<String>,

    pub notable_quote: Option<String>,

    /// Platform under discussion (idv track only)
    pub platform_name: Option<String>,

    /// Model label recorded with the result
    pub model: String,

    pub classified_at: DateTime<Utc>,
}

impl ClassificationRecord {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_parse() {
        assert_eq!("fraud".parse::<Track>().unwrap(), Track::Fraud);
        assert_eq!(" IDV ".parse::<Track>().unwrap(), Track::Idv);
        assert!("kyc".parse::<Track>().is_err());
    }

    #[test]
    fn test_track_serde_lowercase() {
        assert_eq!(serde_json::to_string(&Track::Idv).unwrap(), "\"idv\"");
    }
}
