use crate::output::{emit, print_json, print_table, short_time};
use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::Subcommand;
use govern_core::decision::{ActionDecision, AuditFilter, AuditScope, RecordDecision};
use serde_json::{Map, Value};
use std::path::Path;

#[derive(Subcommand)]
pub enum DecisionSubcommand {
    /// Record the human decision on a proposal
    Record {
        #[arg(long)]
        proposal: String,
        #[arg(long)]
        org: String,
        /// APPROVED | REJECTED | MODIFIED
        #[arg(long)]
        decision: String,
        #[arg(long)]
        by: String,
        /// Reviewer edits as a JSON object (MODIFIED only)
        #[arg(long)]
        payload: Option<String>,
    },

    /// Show a decision by id
    Show {
        id: String,
    },

    /// Decisions recorded for a proposal
    List {
        #[arg(long)]
        proposal: String,
        #[arg(long)]
        org: String,
    },

    /// Query the decision audit log, newest first
    Audit {
        /// Organization to scope to
        #[arg(long, required_unless_present = "all_orgs")]
        org: Option<String>,
        /// Platform-wide read across all organizations
        #[arg(long, conflicts_with = "org")]
        all_orgs: bool,
        #[arg(long)]
        decision: Option<String>,
        #[arg(long)]
        action: Option<String>,
        #[arg(long)]
        by: Option<String>,
        /// RFC 3339 lower bound
        #[arg(long)]
        since: Option<String>,
        /// RFC 3339 upper bound
        #[arg(long)]
        until: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long, default_value = "0")]
        offset: usize,
    },
}

pub fn run(root: &Path, subcmd: DecisionSubcommand, json: bool) -> anyhow::Result<()> {
    let gov = super::open(root)?;
    match subcmd {
        DecisionSubcommand::Record {
            proposal,
            org,
            decision,
            by,
            payload,
        } => {
            let modified_payload = payload
                .map(|raw| {
                    serde_json::from_str::<Map<String, Value>>(&raw)
                        .context("--payload must be a JSON object")
                })
                .transpose()?;
            let result = gov.decide(&RecordDecision {
                proposal_id: proposal,
                organization_id: org,
                decision,
                decided_by_user_id: by,
                modified_payload,
            })?;
            emit(json, &result, |r| {
                println!("recorded {} decision {}", r.decision.decision, r.decision.id);
                if let Some(a) = &r.completed_assignment {
                    println!("  completed assignment {}", a.id);
                }
                if let Some(j) = &r.job {
                    println!("  queued job {}", j.id);
                }
            })
        }

        DecisionSubcommand::Show { id } => {
            let d = gov.ledger.get_decision(super::parse_id("decision", &id)?)?;
            if json {
                return print_json(&d);
            }
            println!("decision:  {}", d.id);
            println!("proposal:  {}", d.proposal_id);
            println!("org:       {}", d.organization_id);
            println!("kind:      {}", d.decision);
            println!("by:        {}", d.decided_by_user_id);
            println!("at:        {}", short_time(&d.decided_at));
            println!("action:    {}", d.proposal_snapshot.action_type);
            println!("payload:   {}", Value::Object(d.effective_payload()));
            Ok(())
        }

        DecisionSubcommand::List { proposal, org } => {
            let rows = gov.ledger.get_decisions_by_proposal(&proposal, &org)?;
            print_decisions(&rows, json)
        }

        DecisionSubcommand::Audit {
            org,
            all_orgs,
            decision,
            action,
            by,
            since,
            until,
            limit,
            offset,
        } => {
            let scope = match (all_orgs, org) {
                (true, _) => AuditScope::AllOrganizations,
                (false, Some(o)) => AuditScope::Organization(o),
                (false, None) => anyhow::bail!("--org or --all-orgs is required"),
            };
            let filter = AuditFilter {
                decision: decision.as_deref().map(str::parse).transpose()?,
                action_type: action.as_deref().map(str::parse).transpose()?,
                decided_by: by,
                since: since.as_deref().map(parse_time).transpose()?,
                until: until.as_deref().map(parse_time).transpose()?,
                limit,
                offset,
            };
            let rows = gov.ledger.get_audit_log(&scope, &filter)?;
            print_decisions(&rows, json)
        }
    }
}

fn parse_time(raw: &str) -> anyhow::Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("invalid timestamp '{raw}'"))?
        .with_timezone(&Utc))
}

fn print_decisions(rows: &[ActionDecision], json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(&rows);
    }
    if rows.is_empty() {
        println!("no decisions");
        return Ok(());
    }
    print_table(
        &["ID", "PROPOSAL", "ORG", "ACTION", "DECISION", "BY", "AT"],
        rows.iter()
            .map(|d| {
                vec![
                    d.id.to_string(),
                    d.proposal_id.clone(),
                    d.organization_id.clone(),
                    d.proposal_snapshot.action_type.to_string(),
                    d.decision.to_string(),
                    d.decided_by_user_id.clone(),
                    short_time(&d.decided_at),
                ]
            })
            .collect(),
    );
    Ok(())
}
