//! Proposals are produced by the recommendation generator outside this crate.
//! The governance pipeline only reads them, through [`crate::collab::ProposalStore`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::{ActionType, ProposalScope, RiskLevel};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionProposal {
    pub proposal_id: String,
    pub organization_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    pub action_type: ActionType,
    pub scope: ProposalScope,
    #[serde(default)]
    pub payload_preview: Map<String, Value>,
    pub risk_level: RiskLevel,
    #[serde(default = "default_requires_approval")]
    pub requires_approval: bool,
    pub created_at: DateTime<Utc>,
}

fn default_requires_approval() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_json_defaults_to_requiring_approval() {
        let json = r#"{
            "proposal_id": "p-1",
            "organization_id": "org-1",
            "action_type": "TASK_CREATE",
            "scope": "PROJECT",
            "risk_level": "LOW",
            "created_at": "2026-01-05T09:00:00Z"
        }"#;
        let p: ActionProposal = serde_json::from_str(json).unwrap();
        assert!(p.requires_approval);
        assert!(p.payload_preview.is_empty());
        assert!(p.project_id.is_none());
        assert_eq!(p.action_type, ActionType::TaskCreate);
    }
}
