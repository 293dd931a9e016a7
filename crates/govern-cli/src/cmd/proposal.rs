use crate::output::{emit, or_dash, print_json, short_time};
use anyhow::Context;
use clap::Subcommand;
use govern_core::policy::GateOutcome;
use govern_core::proposal::ActionProposal;
use govern_core::GovernError;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Subcommand)]
pub enum ProposalSubcommand {
    /// Load proposals from a JSON file (one object or an array)
    Import { file: PathBuf },

    /// Show a stored proposal
    Show { id: String },

    /// Run a proposal through the policy gate and route it
    Submit {
        id: String,
        /// Reviewer to assign when approval is required
        #[arg(long)]
        reviewer: Option<String>,
    },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(Box<ActionProposal>),
    Many(Vec<ActionProposal>),
}

pub fn run(root: &Path, subcmd: ProposalSubcommand, json: bool) -> anyhow::Result<()> {
    let gov = super::open(root)?;
    match subcmd {
        ProposalSubcommand::Import { file } => {
            let data = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let proposals = match serde_json::from_str::<OneOrMany>(&data)
                .with_context(|| format!("{} is not a valid proposal document", file.display()))?
            {
                OneOrMany::One(p) => vec![*p],
                OneOrMany::Many(ps) => ps,
            };
            for p in &proposals {
                gov.store.put_proposal(p)?;
            }
            let ids: Vec<&str> = proposals.iter().map(|p| p.proposal_id.as_str()).collect();
            emit(json, &serde_json::json!({ "imported": ids }), |_| {
                println!("imported {} proposal(s)", ids.len());
            })
        }

        ProposalSubcommand::Show { id } => {
            let p = gov
                .proposals
                .get_proposal(&id)?
                .ok_or(GovernError::ProposalNotFound(id))?;
            emit(json, &p, |p| {
                println!("proposal:  {}", p.proposal_id);
                println!("org:       {}", p.organization_id);
                println!("project:   {}", or_dash(p.project_id.as_deref()));
                println!("action:    {}", p.action_type);
                println!("risk:      {}", p.risk_level);
                println!("approval:  {}", if p.requires_approval { "required" } else { "optional" });
                println!("created:   {}", short_time(&p.created_at));
            })
        }

        ProposalSubcommand::Submit { id, reviewer } => {
            let sub = gov.submit_proposal(&id, reviewer.as_deref())?;
            if json {
                return print_json(&sub);
            }
            match &sub.outcome {
                GateOutcome::Denied { reason } => println!("denied: {reason}"),
                GateOutcome::RequiresApproval => match &sub.assignment {
                    Some(a) => println!(
                        "requires approval: assigned to {} (assignment {}, due {})",
                        a.assignee_user_id,
                        a.id,
                        short_time(&a.sla_deadline)
                    ),
                    None => println!("requires approval: no reviewer assigned"),
                },
                GateOutcome::AutoRun => {
                    if let Some(job) = &sub.job {
                        println!("auto-approved; job {} queued", job.id);
                    }
                }
            }
            Ok(())
        }
    }
}
