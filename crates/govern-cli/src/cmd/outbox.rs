use crate::output::{emit, or_dash, print_json, print_table, short_time};
use clap::Subcommand;
use govern_core::outbox::OutboxType;
use std::path::Path;

#[derive(Subcommand)]
pub enum OutboxSubcommand {
    /// Message counts by status and type
    Stats {
        #[arg(long)]
        org: Option<String>,
    },

    /// List messages, newest first
    List {
        #[arg(long)]
        org: Option<String>,
        /// QUEUED | SENT | FAILED
        #[arg(long)]
        status: Option<String>,
    },

    /// Put a FAILED message back in the queue
    Requeue { id: String },

    /// Opt a user in or out of a notification type
    Prefs {
        #[arg(long)]
        user: String,
        #[arg(long)]
        org: String,
        /// APPROVAL_DUE | PLAYBOOK_STUCK | DEAD_LETTER | ESCALATION
        #[arg(long = "type")]
        message_type: String,
        #[arg(long, conflicts_with = "disable")]
        enable: bool,
        #[arg(long)]
        disable: bool,
    },
}

pub fn run(root: &Path, subcmd: OutboxSubcommand, json: bool) -> anyhow::Result<()> {
    let gov = super::open(root)?;
    match subcmd {
        OutboxSubcommand::Stats { org } => {
            let stats = gov.outbox.get_outbox_stats(org.as_deref())?;
            emit(json, &stats, |s| {
                println!("total: {}", s.total);
                for (status, n) in &s.by_status {
                    println!("  {status:<15} {n}");
                }
                for (kind, n) in &s.by_type {
                    println!("  {kind:<15} {n}");
                }
            })
        }
        OutboxSubcommand::List { org, status } => {
            let status = status.as_deref().map(str::parse).transpose()?;
            let rows = gov.outbox.list_messages(org.as_deref(), status)?;
            if json {
                return print_json(&rows);
            }
            if rows.is_empty() {
                println!("no messages");
                return Ok(());
            }
            print_table(
                &["ID", "TYPE", "TO", "STATUS", "ATTEMPTS", "CREATED", "ERROR"],
                rows.iter()
                    .map(|m| {
                        vec![
                            m.id.to_string(),
                            m.message_type.to_string(),
                            m.recipient_user_id.clone(),
                            m.status.to_string(),
                            m.attempts.to_string(),
                            short_time(&m.created_at),
                            or_dash(m.last_error.as_deref()),
                        ]
                    })
                    .collect(),
            );
            Ok(())
        }
        OutboxSubcommand::Requeue { id } => {
            let msg = gov.outbox.requeue(super::parse_id("message", &id)?)?;
            emit(json, &msg, |m| println!("message {} requeued", m.id))
        }
        OutboxSubcommand::Prefs {
            user,
            org,
            message_type,
            enable,
            disable,
        } => {
            let kind: OutboxType = message_type.parse()?;
            if enable || disable {
                gov.outbox.set_preference(&user, &org, kind, enable)?;
            }
            let enabled = gov.outbox.should_notify(&user, &org, kind)?;
            emit(
                json,
                &serde_json::json!({
                    "user_id": user,
                    "organization_id": org,
                    "type": kind,
                    "enabled": enabled,
                }),
                |_| println!("{kind} for {user}: {}", if enabled { "on" } else { "off" }),
            )
        }
    }
}
