//! The six conflict categories a scenario can provoke.

use std::fmt;
use std::str::FromStr;

use xdcr_error::{Result, SelfCheckError};

use crate::record::{ActionType, Decision};

/// A conflict category, named by the pair of racing operations and how the
/// engine detects the collision.
///
/// Ordinals are stable: they are what configuration files and oracle tooling
/// use to select categories.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub enum ConflictCategory {
    /// Insert vs insert, constraint violation.
    #[serde(rename = "II_CV")]
    IiCv,
    /// Insert vs update, constraint violation.
    #[serde(rename = "IU_CV")]
    IuCv,
    /// Update vs update, constraint violation.
    #[serde(rename = "UU_CV")]
    UuCv,
    /// Update vs update, timestamp mismatch.
    #[serde(rename = "UU_TM")]
    UuTm,
    /// Update vs delete, timestamp mismatch or missing row.
    #[serde(rename = "UD_TM_MR")]
    UdTmMr,
    /// Delete vs delete, missing row.
    #[serde(rename = "DD_MR")]
    DdMr,
}

impl ConflictCategory {
    pub const ALL: [Self; 6] = [
        Self::IiCv,
        Self::IuCv,
        Self::UuCv,
        Self::UuTm,
        Self::UdTmMr,
        Self::DdMr,
    ];

    /// Total mapping from ordinal; anything outside `0..=5` is rejected.
    pub fn from_ordinal(ordinal: i64) -> Result<Self> {
        usize::try_from(ordinal)
            .ok()
            .and_then(|index| Self::ALL.get(index).copied())
            .ok_or_else(|| SelfCheckError::unrecognized("conflict category ordinal", ordinal))
    }

    pub const fn ordinal(self) -> u8 {
        match self {
            Self::IiCv => 0,
            Self::IuCv => 1,
            Self::UuCv => 2,
            Self::UuTm => 3,
            Self::UdTmMr => 4,
            Self::DdMr => 5,
        }
    }

    /// Display name, e.g. `UD_TM_MR`.
    pub const fn name(self) -> &'static str {
        match self {
            Self::IiCv => "II_CV",
            Self::IuCv => "IU_CV",
            Self::UuCv => "UU_CV",
            Self::UuTm => "UU_TM",
            Self::UdTmMr => "UD_TM_MR",
            Self::DdMr => "DD_MR",
        }
    }

    /// Oracle tag, e.g. `UDTMMR`. An oracle row carrying this tag as its
    /// conflict type expects no conflict log entry for the row.
    pub const fn tag(self) -> &'static str {
        match self {
            Self::IiCv => "IICV",
            Self::IuCv => "IUCV",
            Self::UuCv => "UUCV",
            Self::UuTm => "UUTM",
            Self::UdTmMr => "UDTMMR",
            Self::DdMr => "DDMR",
        }
    }

    /// The racing operations, primary side first.
    pub const fn action_pair(self) -> (ActionType, ActionType) {
        match self {
            Self::IiCv => (ActionType::Insert, ActionType::Insert),
            Self::IuCv => (ActionType::Insert, ActionType::Update),
            Self::UuCv | Self::UuTm => (ActionType::Update, ActionType::Update),
            Self::UdTmMr => (ActionType::Delete, ActionType::Update),
            Self::DdMr => (ActionType::Delete, ActionType::Delete),
        }
    }

    /// Whether `action` is one of the racing operations.
    pub fn involves(self, action: ActionType) -> bool {
        let (primary, secondary) = self.action_pair();
        action == primary || action == secondary
    }

    /// Decision logged for the incoming change the category is named after.
    /// Constraint violations reject it; timestamp and missing-row conflicts
    /// keep the surviving write.
    pub const fn expected_decision(self) -> Decision {
        match self {
            Self::IiCv | Self::IuCv | Self::UuCv => Decision::Reject,
            Self::UuTm | Self::UdTmMr | Self::DdMr => Decision::Accept,
        }
    }

    /// Parse either the display name (`UD_TM_MR`) or the tag (`UDTMMR`).
    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.name().eq_ignore_ascii_case(label) || c.tag().eq_ignore_ascii_case(label))
    }
}

impl fmt::Display for ConflictCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ConflictCategory {
    type Err = SelfCheckError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_label(s).ok_or_else(|| SelfCheckError::unrecognized("conflict category", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordinal_mapping_is_total_and_stable() {
        for (index, category) in ConflictCategory::ALL.into_iter().enumerate() {
            let ordinal = i64::try_from(index).expect("small index");
            assert_eq!(
                ConflictCategory::from_ordinal(ordinal).expect("in range"),
                category
            );
            assert_eq!(i64::from(category.ordinal()), ordinal);
        }
        assert_eq!(
            ConflictCategory::from_ordinal(4).expect("ordinal 4"),
            ConflictCategory::UdTmMr
        );
    }

    #[test]
    fn out_of_range_ordinals_fail() {
        for bad in [-1, 6, 42, i64::MAX] {
            let err = ConflictCategory::from_ordinal(bad).expect_err("out of range");
            assert!(matches!(err, SelfCheckError::UnrecognizedTag { .. }), "ordinal={bad}");
        }
    }

    #[test]
    fn labels_parse_both_spellings() {
        assert_eq!(
            "UD_TM_MR".parse::<ConflictCategory>().expect("name"),
            ConflictCategory::UdTmMr
        );
        assert_eq!(
            "uutm".parse::<ConflictCategory>().expect("tag"),
            ConflictCategory::UuTm
        );
        assert!("XX_YY".parse::<ConflictCategory>().is_err());
    }

    #[test]
    fn action_pairs() {
        assert_eq!(
            ConflictCategory::UdTmMr.action_pair(),
            (ActionType::Delete, ActionType::Update)
        );
        assert!(ConflictCategory::IuCv.involves(ActionType::Update));
        assert!(!ConflictCategory::IiCv.involves(ActionType::Delete));
    }
}
