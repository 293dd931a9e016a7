use crate::output::emit;
use clap::Subcommand;
use govern_core::policy::PolicyUpdate;
use govern_core::types::ActionType;
use std::path::Path;

#[derive(Subcommand)]
pub enum PolicySubcommand {
    /// Show the effective policy for an organization or project
    Show {
        #[arg(long)]
        org: String,
        #[arg(long)]
        project: Option<String>,
    },

    /// Set the policy level (and, at organization level, the ceiling)
    Set {
        #[arg(long)]
        org: String,
        #[arg(long)]
        project: Option<String>,
        /// ADVISORY | ASSISTED | PROACTIVE | AUTOPILOT
        #[arg(long)]
        level: String,
        /// Organization ceiling for project overrides
        #[arg(long)]
        max: Option<String>,
        #[arg(long, default_value = "cli")]
        by: String,
    },

    /// Check whether an action type is allowed right now
    Check {
        #[arg(long)]
        org: String,
        #[arg(long)]
        project: Option<String>,
        /// Action type, e.g. TASK_CREATE
        #[arg(long)]
        action: String,
    },
}

pub fn run(root: &Path, subcmd: PolicySubcommand, json: bool) -> anyhow::Result<()> {
    let gov = super::open(root)?;
    match subcmd {
        PolicySubcommand::Show { org, project } => {
            let p = gov.policy.get_effective_policy(&org, project.as_deref())?;
            emit(json, &p, |p| {
                println!("organization: {}", p.organization_id);
                if let Some(project) = &p.project_id {
                    println!("project:      {project}");
                }
                println!("effective:    {}", p.policy_level);
                println!("configured:   {}", p.configured_level);
                println!("ceiling:      {}", p.max_policy_level);
                if p.clamped {
                    println!("              (override clamped to ceiling)");
                }
                if p.regulatory_mode_enabled {
                    println!("regulatory:   on (forces ADVISORY)");
                }
                if !p.active_roles.is_empty() {
                    println!("roles:        {}", p.active_roles.join(", "));
                }
            })
        }

        PolicySubcommand::Set {
            org,
            project,
            level,
            max,
            by,
        } => {
            let record = gov.policy.update_policy(&PolicyUpdate {
                organization_id: org,
                project_id: project,
                policy_level: level,
                max_policy_level: max,
                updated_by: Some(by),
            })?;
            emit(json, &record, |r| {
                let scope = match &r.project_id {
                    Some(p) => format!("{}/{p}", r.organization_id),
                    None => r.organization_id.clone(),
                };
                println!("policy for {scope} set to {}", r.policy_level);
            })
        }

        PolicySubcommand::Check {
            org,
            project,
            action,
        } => {
            let action: ActionType = action.parse()?;
            let check = gov.policy.can_perform_action(action, &org, project.as_deref())?;
            emit(json, &check, |c| {
                if c.allowed {
                    println!("allowed ({action} at {})", c.effective_level);
                } else {
                    println!("denied: {}", c.reason.as_deref().unwrap_or("policy"));
                }
            })
        }
    }
}
