//! Segmented external identifiers encoding treatment, patient, timepoint and tier lineage.
//!
//! Grammar: `<treatment>:0<patient>:<timepoint>[:<tier>:<index>[<sub>]]`. Patient-level
//! identifiers stop after the patient segment (`B:03`). Biopsies join tier letter and index
//! in one segment (`B:03:2:T1`).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TierSegment {
    pub letter: char,
    pub index: u32,
    pub sub: Option<char>,
    /// Letter and index share one segment, `T1` instead of `T:1`
    #[serde(default)]
    pub compact: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExternalId {
    pub treatment: char,
    pub patient: u8,
    pub timepoint: Option<u8>,
    pub tier: Option<TierSegment>,
}

fn single_digit(input: &str, what: &str) -> Result<u8, String> {
    let mut chars = input.chars();
    match (chars.next(), chars.next()) {
        (Some(c @ '1'..='9'), None) => Ok(c as u8 - b'0'),
        _ => Err(format!("{} must be a single digit 1-9, got '{}'", what, input)),
    }
}

fn treatment_letter(treatment: &str) -> Result<char, String> {
    treatment
        .chars()
        .next()
        .filter(char::is_ascii_alphabetic)
        .map(|c| c.to_ascii_uppercase())
        .ok_or_else(|| format!("treatment '{}' must start with a letter", treatment))
}

impl ExternalId {
    /// Patient-level identifier from user input, e.g. ("Blood", "3") -> `B:03`
    pub fn patient(treatment: &str, patient: &str) -> Result<Self, String> {
        Ok(Self {
            treatment: treatment_letter(treatment)?,
            patient: single_digit(patient, "patient")?,
            timepoint: None,
            tier: None,
        })
    }

    /// Case identifier from user input, e.g. ("Blood", "3", "2") -> `B:03:2`
    pub fn case(treatment: &str, patient: &str, timepoint: &str) -> Result<Self, String> {
        Ok(Self::patient(treatment, patient)?.at_timepoint(single_digit(timepoint, "timepoint")?))
    }

    pub fn at_timepoint(&self, timepoint: u8) -> Self {
        Self {
            timepoint: Some(timepoint),
            tier: None,
            ..*self
        }
    }

    /// Child identifier one tier down, e.g. `B:03:2` -> `B:03:2:U:1`
    pub fn tier(&self, letter: char, index: u32) -> Result<Self, String> {
        self.child(letter, index, false)
    }

    /// Biopsy identifier, e.g. `B:03:2` -> `B:03:2:T1`
    pub fn biopsy(&self, letter: char, index: u32) -> Result<Self, String> {
        self.child(letter, index, true)
    }

    fn child(&self, letter: char, index: u32, compact: bool) -> Result<Self, String> {
        if self.timepoint.is_none() {
            return Err(format!("{} has no timepoint segment", self));
        }
        if self.tier.is_some() {
            return Err(format!("{} already carries a tier segment", self));
        }
        if !letter.is_ascii_uppercase() {
            return Err(format!("tier letter '{}' must be an uppercase letter", letter));
        }
        Ok(Self {
            tier: Some(TierSegment {
                letter,
                index,
                sub: None,
                compact,
            }),
            ..*self
        })
    }

    /// Aliquot `i` (1-based) of a tiered identifier, e.g. `B:03:2:U:1` -> `B:03:2:U:1a`
    pub fn aliquot(&self, i: u32) -> Result<Self, String> {
        let tier = match self.tier {
            Some(t) if t.sub.is_none() => t,
            Some(_) => return Err(format!("{} already is an aliquot", self)),
            None => return Err(format!("{} has no tier segment", self)),
        };
        if i == 0 || i > 26 {
            return Err(format!("aliquot index {} out of range", i));
        }
        let sub = (b'a' + (i - 1) as u8) as char;
        Ok(Self {
            tier: Some(TierSegment {
                sub: Some(sub),
                ..tier
            }),
            ..*self
        })
    }

    /// `<T>:0<p>`
    pub fn patient_key(&self) -> String {
        format!("{}:0{}", self.treatment, self.patient)
    }

    /// `<T>:0<p>:<t>` for identifiers that carry a timepoint
    pub fn case_key(&self) -> Option<String> {
        self.timepoint
            .map(|t| format!("{}:{}", self.patient_key(), t))
    }
}

impl fmt::Display for ExternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.patient_key())?;
        if let Some(t) = self.timepoint {
            write!(f, ":{}", t)?;
        }
        if let Some(tier) = self.tier {
            if tier.compact {
                write!(f, ":{}{}", tier.letter, tier.index)?;
            } else {
                write!(f, ":{}:{}", tier.letter, tier.index)?;
            }
            if let Some(sub) = tier.sub {
                write!(f, "{}", sub)?;
            }
        }
        Ok(())
    }
}

/// `<index>[<sub>]`
fn tier_index(input: &str) -> Option<(u32, Option<char>)> {
    let (digits, sub) = match input.chars().last() {
        Some(c) if c.is_ascii_lowercase() => (&input[..input.len() - 1], Some(c)),
        _ => (input, None),
    };
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok().map(|index| (index, sub))
}

impl FromStr for ExternalId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let segments: Vec<&str> = s.split(':').collect();
        if !matches!(segments.len(), 2..=5) {
            return Err(format!("'{}' has {} segments", s, segments.len()));
        }

        let mut treatment = segments[0].chars();
        let treatment = match (treatment.next(), treatment.next()) {
            (Some(c), None) if c.is_ascii_uppercase() => c,
            _ => return Err(format!("'{}': bad treatment segment", s)),
        };
        let patient = match segments[1].strip_prefix('0') {
            Some(digit) => single_digit(digit, "patient").map_err(|e| format!("'{}': {}", s, e))?,
            None => return Err(format!("'{}': patient segment must be 0<digit>", s)),
        };
        let timepoint = match segments.get(2) {
            Some(t) => Some(single_digit(t, "timepoint").map_err(|e| format!("'{}': {}", s, e))?),
            None => None,
        };
        let tier = match segments.get(3) {
            None => None,
            Some(segment) => {
                let mut chars = segment.chars();
                let letter = match chars.next() {
                    Some(c) if c.is_ascii_uppercase() => c,
                    _ => return Err(format!("'{}': bad tier letter", s)),
                };
                // `T:1` spans two segments, `T1` carries the index itself
                let (rest, compact) = match segments.get(4) {
                    Some(rest) if chars.as_str().is_empty() => (*rest, false),
                    None => (chars.as_str(), true),
                    Some(_) => return Err(format!("'{}': bad tier letter", s)),
                };
                let (index, sub) =
                    tier_index(rest).ok_or_else(|| format!("'{}': bad tier index", s))?;
                Some(TierSegment {
                    letter,
                    index,
                    sub,
                    compact,
                })
            }
        };

        Ok(Self {
            treatment,
            patient,
            timepoint,
            tier,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_and_aliquot() {
        let base = ExternalId::case("Blood", "3", "2").unwrap();
        assert_eq!(base.to_string(), "B:03:2");
        let urine = base.tier('U', 1).unwrap();
        assert_eq!(urine.to_string(), "B:03:2:U:1");
        assert_eq!(urine.aliquot(1).unwrap().to_string(), "B:03:2:U:1a");
        assert_eq!(urine.aliquot(5).unwrap().to_string(), "B:03:2:U:1e");
        // deterministic
        assert_eq!(
            ExternalId::case("Blood", "3", "2").unwrap().tier('U', 1).unwrap(),
            urine
        );
    }

    #[test]
    fn test_lowercase_treatment_is_uppercased() {
        assert_eq!(ExternalId::patient("sorafenib", "7").unwrap().to_string(), "S:07");
    }

    #[test]
    fn test_parse() {
        for raw in [
            "B:03",
            "B:03:2",
            "B:03:2:U:1",
            "B:03:2:B:3b",
            "T:09:1:T:12",
            "B:03:2:T1",
            "B:03:2:L12",
        ] {
            assert_eq!(raw.parse::<ExternalId>().unwrap().to_string(), raw);
        }
        let parsed: ExternalId = "B:03:2:U:1a".parse().unwrap();
        assert_eq!(parsed.case_key().unwrap(), "B:03:2");
        assert_eq!(parsed.tier.unwrap().sub, Some('a'));
    }

    #[test]
    fn test_biopsy_joins_letter_and_index() {
        let case = ExternalId::case("Blood", "3", "2").unwrap();
        let tumor = case.biopsy('T', 1).unwrap();
        assert_eq!(tumor.to_string(), "B:03:2:T1");
        assert_eq!("B:03:2:T1".parse::<ExternalId>().unwrap(), tumor);
        assert_ne!("B:03:2:T:1".parse::<ExternalId>().unwrap(), tumor);
        assert_eq!(tumor.case_key().unwrap(), "B:03:2");
        assert!(tumor.biopsy('L', 1).is_err());
    }

    #[test]
    fn test_parse_rejects_other_layouts() {
        for raw in ["", "patient 7", "b:03:2", "B:3:2", "B:03:22", "B:03:2:U", "B:03:2:u:1", "B:03:2:U:x",
            "B:03:2:T", "B:03:2:TX", "B:03:2:U1:1", "B:03:2:U:1:a"] {
            assert!(raw.parse::<ExternalId>().is_err(), "{} accepted", raw);
        }
    }

    #[test]
    fn test_invalid_input() {
        assert!(ExternalId::case("Blood", "10", "2").is_err());
        assert!(ExternalId::case("", "1", "2").is_err());
        assert!(ExternalId::case("Blood", "1", "0").is_err());
        let patient = ExternalId::patient("Blood", "1").unwrap();
        assert!(patient.tier('U', 1).is_err());
    }
}
