use crate::output::{emit, print_json, print_table, short_time};
use clap::Subcommand;
use std::path::Path;

#[derive(Subcommand)]
pub enum ApprovalSubcommand {
    /// Assign a proposal to a reviewer with an SLA
    Assign {
        #[arg(long)]
        proposal: String,
        #[arg(long = "to")]
        assignee: String,
        /// Hours until escalation (default from config)
        #[arg(long)]
        sla_hours: Option<u32>,
    },

    /// Acknowledge a PENDING assignment
    Ack { id: String },

    /// Complete an assignment
    Complete { id: String },

    /// Live assignments for a reviewer, soonest deadline first
    Mine {
        #[arg(long)]
        user: String,
        #[arg(long)]
        org: String,
    },

    /// Count of live assignments past their deadline
    Overdue {
        #[arg(long)]
        org: String,
    },
}

pub fn run(root: &Path, subcmd: ApprovalSubcommand, json: bool) -> anyhow::Result<()> {
    let gov = super::open(root)?;
    let wq = &gov.workqueue;
    match subcmd {
        ApprovalSubcommand::Assign {
            proposal,
            assignee,
            sla_hours,
        } => {
            let a = wq.assign_approval(&proposal, &assignee, sla_hours)?;
            emit(json, &a, |a| {
                println!(
                    "assignment {} for {} due {}",
                    a.id,
                    a.assignee_user_id,
                    short_time(&a.sla_deadline)
                )
            })
        }
        ApprovalSubcommand::Ack { id } => {
            let a = wq.acknowledge_approval(super::parse_id("assignment", &id)?)?;
            emit(json, &a, |a| println!("assignment {} is {}", a.id, a.status))
        }
        ApprovalSubcommand::Complete { id } => {
            let a = wq.complete_approval(super::parse_id("assignment", &id)?)?;
            emit(json, &a, |a| println!("assignment {} is {}", a.id, a.status))
        }
        ApprovalSubcommand::Mine { user, org } => {
            let rows = wq.get_my_approvals(&user, &org)?;
            if json {
                return print_json(&rows);
            }
            if rows.is_empty() {
                println!("no pending approvals for {user}");
                return Ok(());
            }
            print_table(
                &["ID", "PROPOSAL", "STATUS", "DUE"],
                rows.iter()
                    .map(|a| {
                        vec![
                            a.id.to_string(),
                            a.proposal_id.clone(),
                            a.status.to_string(),
                            short_time(&a.sla_deadline),
                        ]
                    })
                    .collect(),
            );
            Ok(())
        }
        ApprovalSubcommand::Overdue { org } => {
            let n = wq.get_overdue_count(&org)?;
            emit(json, &serde_json::json!({ "organization_id": org, "overdue": n }), |_| {
                println!("{n} overdue")
            })
        }
    }
}
