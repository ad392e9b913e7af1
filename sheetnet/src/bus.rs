//! Bus name syntax
//!
//! Two forms are recognised:
//! - vector `DATA[0..7]`, ascending or descending, expanding to `DATA0`..`DATA7`
//! - group `I2C{SDA SCL}`, expanding to `I2C.SDA`, `I2C.SCL`; members may
//!   themselves be vectors (`MEM{A[0..3] WE}`), and an empty prefix keeps the
//!   member names bare (`{SDA SCL}` -> `SDA`, `SCL`)
//!
//! Members carry a [`SlotKey`] used to line two declarations up against each
//! other: vector members by position, group members by declared name.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::LazyLock;
use thiserror::Error;

/// Widest bus accepted before the declaration is treated as malformed
pub const MAX_BUS_WIDTH: usize = 1024;

static VECTOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([^\[\]{}\s]+)\[(\d+)\.\.(\d+)\]$").unwrap());

static GROUP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([^\[\]{}\s]*)\{([^{}]*)\}$").unwrap());

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusSyntaxError {
    #[error("'{0}' is not a vector or group bus name")]
    NotABus(String),
    #[error("bus '{text}' is {width} members wide (limit {limit})")]
    TooWide {
        text: String,
        width: usize,
        limit: usize,
    },
    #[error("bus group '{0}' has no members")]
    EmptyGroup(String),
    #[error("member '{member}' of bus group '{text}' is not a signal or vector name")]
    BadMember { text: String, member: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusForm {
    Vector,
    Group,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SlotKey {
    Index(usize),
    Name(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BusMember {
    /// Expanded sheet-local signal name (`DATA3`, `I2C.SDA`)
    pub name: String,
    pub key: SlotKey,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BusName {
    pub text: String,
    pub prefix: String,
    pub form: BusForm,
    pub members: Vec<BusMember>,
}

/// Cheap syntactic check: does this text try to declare a bus?
pub fn looks_like_bus(text: &str) -> bool {
    text.contains('{') || (text.contains('[') && text.contains(".."))
}

fn expand_vector(prefix: &str, from: &str, to: &str, text: &str) -> Result<Vec<String>, BusSyntaxError> {
    let parse = |s: &str| {
        s.parse::<usize>().map_err(|_| BusSyntaxError::TooWide {
            text: text.to_string(),
            width: usize::MAX,
            limit: MAX_BUS_WIDTH,
        })
    };
    let (from, to) = (parse(from)?, parse(to)?);
    let width = from.abs_diff(to) + 1;
    if width > MAX_BUS_WIDTH {
        return Err(BusSyntaxError::TooWide {
            text: text.to_string(),
            width,
            limit: MAX_BUS_WIDTH,
        });
    }
    let names = if from <= to {
        (from..=to).map(|i| format!("{}{}", prefix, i)).collect()
    } else {
        (to..=from).rev().map(|i| format!("{}{}", prefix, i)).collect()
    };
    Ok(names)
}

impl BusName {
    pub fn parse(text: &str) -> Result<Self, BusSyntaxError> {
        let trimmed = text.trim();

        if let Some(caps) = VECTOR_RE.captures(trimmed) {
            let prefix = caps[1].to_string();
            let names = expand_vector(&prefix, &caps[2], &caps[3], trimmed)?;
            let members = names
                .into_iter()
                .enumerate()
                .map(|(i, name)| BusMember {
                    name,
                    key: SlotKey::Index(i),
                })
                .collect();
            return Ok(Self {
                text: trimmed.to_string(),
                prefix,
                form: BusForm::Vector,
                members,
            });
        }

        if let Some(caps) = GROUP_RE.captures(trimmed) {
            let prefix = caps[1].to_string();
            let mut members = Vec::new();
            for raw in caps[2].split(|c: char| c.is_whitespace() || c == ',') {
                if raw.is_empty() {
                    continue;
                }
                let locals = if let Some(inner) = VECTOR_RE.captures(raw) {
                    expand_vector(&inner[1], &inner[2], &inner[3], trimmed)?
                } else if raw.contains(|c: char| matches!(c, '[' | ']' | '{' | '}')) {
                    return Err(BusSyntaxError::BadMember {
                        text: trimmed.to_string(),
                        member: raw.to_string(),
                    });
                } else {
                    vec![raw.to_string()]
                };
                for local in locals {
                    let name = if prefix.is_empty() {
                        local.clone()
                    } else {
                        format!("{}.{}", prefix, local)
                    };
                    members.push(BusMember {
                        name,
                        key: SlotKey::Name(local),
                    });
                }
            }
            if members.is_empty() {
                return Err(BusSyntaxError::EmptyGroup(trimmed.to_string()));
            }
            if members.len() > MAX_BUS_WIDTH {
                return Err(BusSyntaxError::TooWide {
                    text: trimmed.to_string(),
                    width: members.len(),
                    limit: MAX_BUS_WIDTH,
                });
            }
            return Ok(Self {
                text: trimmed.to_string(),
                prefix,
                form: BusForm::Group,
                members,
            });
        }

        Err(BusSyntaxError::NotABus(trimmed.to_string()))
    }

    pub fn width(&self) -> usize {
        self.members.len()
    }

    fn name_set(&self) -> HashSet<&str> {
        self.members.iter().map(|m| m.name.as_str()).collect()
    }

    /// `BUS[1..4]` is a strict superset of `BUS[1..3]`.
    pub fn is_strict_superset_of(&self, other: &BusName) -> bool {
        if self.width() <= other.width() {
            return false;
        }
        let mine = self.name_set();
        other.members.iter().all(|m| mine.contains(m.name.as_str()))
    }
}

/// Member-by-member correspondence between two bus declarations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alignment {
    /// `(position in a, position in b)`
    pub pairs: Vec<(usize, usize)>,
    pub mismatch: bool,
}

/// Line two declarations up: by declared member name when both are groups,
/// by position otherwise. The aggregate names play no part.
pub fn align(a: &BusName, b: &BusName) -> Alignment {
    if a.form == BusForm::Group && b.form == BusForm::Group {
        let pairs: Vec<(usize, usize)> = a
            .members
            .iter()
            .enumerate()
            .filter_map(|(i, m)| {
                b.members
                    .iter()
                    .position(|other| other.key == m.key)
                    .map(|j| (i, j))
            })
            .collect();
        let mismatch = pairs.len() != a.width() || a.width() != b.width();
        return Alignment { pairs, mismatch };
    }

    let common = a.width().min(b.width());
    Alignment {
        pairs: (0..common).map(|i| (i, i)).collect(),
        mismatch: a.width() != b.width(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(bus: &BusName) -> Vec<&str> {
        bus.members.iter().map(|m| m.name.as_str()).collect()
    }

    #[test]
    fn test_parse_vector_ascending() {
        let bus = BusName::parse("DATA[0..3]").unwrap();
        assert_eq!(bus.form, BusForm::Vector);
        assert_eq!(bus.prefix, "DATA");
        assert_eq!(names(&bus), vec!["DATA0", "DATA1", "DATA2", "DATA3"]);
        assert_eq!(bus.members[2].key, SlotKey::Index(2));
    }

    #[test]
    fn test_parse_vector_descending() {
        let bus = BusName::parse("A[3..1]").unwrap();
        assert_eq!(names(&bus), vec!["A3", "A2", "A1"]);
    }

    #[test]
    fn test_parse_group_with_prefix_and_vector_member() {
        let bus = BusName::parse("MEM{A[0..1] WE}").unwrap();
        assert_eq!(bus.form, BusForm::Group);
        assert_eq!(names(&bus), vec!["MEM.A0", "MEM.A1", "MEM.WE"]);
        assert_eq!(bus.members[2].key, SlotKey::Name("WE".to_string()));
    }

    #[test]
    fn test_parse_anonymous_group() {
        let bus = BusName::parse("{SDA, SCL}").unwrap();
        assert_eq!(names(&bus), vec!["SDA", "SCL"]);
    }

    #[test]
    fn test_malformed_names() {
        assert!(looks_like_bus("DATA[3.."));
        assert!(BusName::parse("DATA[3..").is_err());
        assert!(matches!(BusName::parse("G{}"), Err(BusSyntaxError::EmptyGroup(_))));
        assert!(matches!(
            BusName::parse("G{A{B}}"),
            Err(BusSyntaxError::NotABus(_)) | Err(BusSyntaxError::BadMember { .. })
        ));
        assert!(matches!(
            BusName::parse("W[0..5000]"),
            Err(BusSyntaxError::TooWide { .. })
        ));
        assert!(!looks_like_bus("A[1]"));
    }

    #[test]
    fn test_strict_superset() {
        let wide = BusName::parse("BUS[1..4]").unwrap();
        let narrow = BusName::parse("BUS[1..3]").unwrap();
        assert!(wide.is_strict_superset_of(&narrow));
        assert!(!narrow.is_strict_superset_of(&wide));
        assert!(!wide.is_strict_superset_of(&wide));
        let other = BusName::parse("OTHER[1..8]").unwrap();
        assert!(!other.is_strict_superset_of(&narrow));
    }

    #[test]
    fn test_align_vectors_by_position() {
        let a = BusName::parse("BUS[0..1]").unwrap();
        let b = BusName::parse("SUB_BUS[4..5]").unwrap();
        let alignment = align(&a, &b);
        assert_eq!(alignment.pairs, vec![(0, 0), (1, 1)]);
        assert!(!alignment.mismatch);
    }

    #[test]
    fn test_align_groups_by_member_name() {
        let a = BusName::parse("I2C{SDA SCL}").unwrap();
        let b = BusName::parse("PORT{SCL SDA}").unwrap();
        let alignment = align(&a, &b);
        assert_eq!(alignment.pairs, vec![(0, 1), (1, 0)]);
        assert!(!alignment.mismatch);
    }

    #[test]
    fn test_align_reports_width_mismatch() {
        let a = BusName::parse("D[0..3]").unwrap();
        let b = BusName::parse("D[0..1]").unwrap();
        let alignment = align(&a, &b);
        assert_eq!(alignment.pairs, vec![(0, 0), (1, 1)]);
        assert!(alignment.mismatch);
    }
}
