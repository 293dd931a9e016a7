use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::GovernError;

// ---------------------------------------------------------------------------
// PolicyLevel
// ---------------------------------------------------------------------------

/// How autonomously AI-proposed actions may execute. Ordered from most to
/// least conservative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyLevel {
    Advisory,
    Assisted,
    Proactive,
    Autopilot,
}

impl PolicyLevel {
    pub fn all() -> &'static [PolicyLevel] {
        &[
            PolicyLevel::Advisory,
            PolicyLevel::Assisted,
            PolicyLevel::Proactive,
            PolicyLevel::Autopilot,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PolicyLevel::Advisory => "ADVISORY",
            PolicyLevel::Assisted => "ASSISTED",
            PolicyLevel::Proactive => "PROACTIVE",
            PolicyLevel::Autopilot => "AUTOPILOT",
        }
    }
}

impl fmt::Display for PolicyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PolicyLevel {
    type Err = GovernError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ADVISORY" => Ok(PolicyLevel::Advisory),
            "ASSISTED" => Ok(PolicyLevel::Assisted),
            "PROACTIVE" => Ok(PolicyLevel::Proactive),
            "AUTOPILOT" => Ok(PolicyLevel::Autopilot),
            _ => Err(GovernError::InvalidPolicyLevel(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// ActionType
// ---------------------------------------------------------------------------

/// Every kind of action the advisor can propose. The minimum policy level and
/// the fields a reviewer may edit are fixed per variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    SuggestInsight,
    CreateDraftTask,
    TaskCreate,
    TaskUpdate,
    MeetingSchedule,
    ConnectorCall,
    InitiativeUpdate,
}

impl ActionType {
    pub fn all() -> &'static [ActionType] {
        &[
            ActionType::SuggestInsight,
            ActionType::CreateDraftTask,
            ActionType::TaskCreate,
            ActionType::TaskUpdate,
            ActionType::MeetingSchedule,
            ActionType::ConnectorCall,
            ActionType::InitiativeUpdate,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ActionType::SuggestInsight => "SUGGEST_INSIGHT",
            ActionType::CreateDraftTask => "CREATE_DRAFT_TASK",
            ActionType::TaskCreate => "TASK_CREATE",
            ActionType::TaskUpdate => "TASK_UPDATE",
            ActionType::MeetingSchedule => "MEETING_SCHEDULE",
            ActionType::ConnectorCall => "CONNECTOR_CALL",
            ActionType::InitiativeUpdate => "INITIATIVE_UPDATE",
        }
    }

    /// Lowest effective policy level at which this action may be proposed.
    pub fn min_policy_level(self) -> PolicyLevel {
        match self {
            ActionType::SuggestInsight => PolicyLevel::Advisory,
            ActionType::CreateDraftTask | ActionType::TaskCreate | ActionType::TaskUpdate => {
                PolicyLevel::Assisted
            }
            ActionType::MeetingSchedule | ActionType::ConnectorCall => PolicyLevel::Proactive,
            ActionType::InitiativeUpdate => PolicyLevel::Autopilot,
        }
    }

    /// Payload keys a human reviewer may change in a MODIFIED decision.
    pub fn modifiable_fields(self) -> &'static [&'static str] {
        match self {
            ActionType::SuggestInsight => &[],
            ActionType::CreateDraftTask => &["title", "description"],
            ActionType::TaskCreate => &["title", "description", "due_date"],
            ActionType::TaskUpdate => &["title", "description", "due_date", "status", "assignee_id"],
            ActionType::MeetingSchedule => &["participants", "title"],
            ActionType::ConnectorCall => &["parameters"],
            ActionType::InitiativeUpdate => &["status", "owner_id"],
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ActionType {
    type Err = GovernError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActionType::all()
            .iter()
            .copied()
            .find(|a| a.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| GovernError::InvalidActionType(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// ProposalScope / RiskLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProposalScope {
    User,
    Project,
    Initiative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
        })
    }
}

// ---------------------------------------------------------------------------
// DecisionKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionKind {
    Approved,
    Rejected,
    Modified,
}

impl DecisionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DecisionKind::Approved => "APPROVED",
            DecisionKind::Rejected => "REJECTED",
            DecisionKind::Modified => "MODIFIED",
        }
    }

    /// Whether the decision authorises execution.
    pub fn is_executable(self) -> bool {
        matches!(self, DecisionKind::Approved | DecisionKind::Modified)
    }
}

impl fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DecisionKind {
    type Err = GovernError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "APPROVED" => Ok(DecisionKind::Approved),
            "REJECTED" => Ok(DecisionKind::Rejected),
            "MODIFIED" => Ok(DecisionKind::Modified),
            _ => Err(GovernError::InvalidDecisionType(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_levels_are_ordered() {
        assert!(PolicyLevel::Advisory < PolicyLevel::Assisted);
        assert!(PolicyLevel::Assisted < PolicyLevel::Proactive);
        assert!(PolicyLevel::Proactive < PolicyLevel::Autopilot);
    }

    #[test]
    fn policy_level_parse_rejects_unknown() {
        assert_eq!("assisted".parse::<PolicyLevel>().unwrap(), PolicyLevel::Assisted);
        let err = "TURBO".parse::<PolicyLevel>().unwrap_err();
        assert!(matches!(err, GovernError::InvalidPolicyLevel(_)));
    }

    #[test]
    fn action_type_wire_names_parse_back() {
        for action in ActionType::all() {
            assert_eq!(action.as_str().parse::<ActionType>().unwrap(), *action);
        }
        assert!("DELETE_EVERYTHING".parse::<ActionType>().is_err());
    }

    #[test]
    fn task_create_allowlist_excludes_budget() {
        let fields = ActionType::TaskCreate.modifiable_fields();
        assert!(fields.contains(&"due_date"));
        assert!(!fields.contains(&"budget"));
        assert_eq!(
            ActionType::MeetingSchedule.modifiable_fields(),
            &["participants", "title"]
        );
    }

    #[test]
    fn create_draft_task_requires_assisted() {
        assert_eq!(
            ActionType::CreateDraftTask.min_policy_level(),
            PolicyLevel::Assisted
        );
    }

    #[test]
    fn decision_kind_serializes_screaming() {
        let json = serde_json::to_string(&DecisionKind::Modified).unwrap();
        assert_eq!(json, "\"MODIFIED\"");
        assert!(matches!(
            "MAYBE".parse::<DecisionKind>(),
            Err(GovernError::InvalidDecisionType(_))
        ));
    }
}
