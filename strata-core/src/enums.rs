//! Enum types for Strata entities

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// NODE ENUMS
// ============================================================================

/// Role of the party that produced a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeRole {
    /// The originator of a turn (the human or calling agent)
    User,
    /// The responder (the assistant)
    Assistant,
    /// Injected system content
    System,
}

impl NodeRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phase of the conversation a node was produced in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConversationPhase {
    #[default]
    Exploration,
    Planning,
    Implementation,
    Review,
    Debugging,
}

impl ConversationPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exploration => "exploration",
            Self::Planning => "planning",
            Self::Implementation => "implementation",
            Self::Review => "review",
            Self::Debugging => "debugging",
        }
    }
}

impl fmt::Display for ConversationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// RESOLUTION TIER
// ============================================================================

/// Detail level retained for a history node.
///
/// Variants are declared from least to most detailed so that the derived
/// ordering gives `Full > Summary > Title > Hidden`, and `min` picks the
/// most restrictive tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResolutionTier {
    Hidden,
    Title,
    Summary,
    Full,
}

impl ResolutionTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hidden => "hidden",
            Self::Title => "title",
            Self::Summary => "summary",
            Self::Full => "full",
        }
    }

    /// Whether a node at this tier contributes anything to the window.
    pub fn is_visible(&self) -> bool {
        !matches!(self, Self::Hidden)
    }
}

impl fmt::Display for ResolutionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// CHECKPOINT TYPE
// ============================================================================

/// Kind of conversational milestone a checkpoint marks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CheckpointType {
    Milestone,
    Decision,
    Pivot,
    Completion,
}

// ============================================================================
// GATE / CRITIC ENUMS
// ============================================================================

/// Statistical method used for the gate's statistical estimate and
/// batch-local outlier detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutlierMethod {
    ZScore,
    #[default]
    Mad,
    Iqr,
}

impl FromStr for OutlierMethod {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "zscore" | "z_score" | "z-score" => Ok(Self::ZScore),
            "mad" => Ok(Self::Mad),
            "iqr" => Ok(Self::Iqr),
            _ => Err(EnumParseError {
                kind: "outlier method",
                value: s.to_string(),
            }),
        }
    }
}

/// Kind of task a retrieval serves. Drives critic heuristics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Code,
    Documentation,
    Planning,
    Debugging,
    #[default]
    General,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Documentation => "documentation",
            Self::Planning => "planning",
            Self::Debugging => "debugging",
            Self::General => "general",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "code" => Ok(Self::Code),
            "documentation" | "docs" => Ok(Self::Documentation),
            "planning" => Ok(Self::Planning),
            "debugging" | "debug" => Ok(Self::Debugging),
            "general" => Ok(Self::General),
            _ => Err(EnumParseError {
                kind: "task type",
                value: s.to_string(),
            }),
        }
    }
}

/// Error parsing an enum from its string form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumParseError {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for EnumParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: {}", self.kind, self.value)
    }
}

impl std::error::Error for EnumParseError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_ordering() {
        assert!(ResolutionTier::Full > ResolutionTier::Summary);
        assert!(ResolutionTier::Summary > ResolutionTier::Title);
        assert!(ResolutionTier::Title > ResolutionTier::Hidden);
        assert_eq!(
            ResolutionTier::Full.min(ResolutionTier::Title),
            ResolutionTier::Title
        );
    }

    #[test]
    fn test_outlier_method_parse() {
        assert_eq!("MAD".parse::<OutlierMethod>().unwrap(), OutlierMethod::Mad);
        assert_eq!("z-score".parse::<OutlierMethod>().unwrap(), OutlierMethod::ZScore);
        assert!("nope".parse::<OutlierMethod>().is_err());
    }

    #[test]
    fn test_task_type_roundtrip() {
        for task in [
            TaskType::Code,
            TaskType::Documentation,
            TaskType::Planning,
            TaskType::Debugging,
            TaskType::General,
        ] {
            assert_eq!(task.as_str().parse::<TaskType>().unwrap(), task);
        }
    }
}
