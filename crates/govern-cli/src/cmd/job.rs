use crate::output::{emit, or_dash, print_json, print_table, short_time};
use clap::Subcommand;
use govern_core::jobs::{AsyncJob, JobFilter, JobPayload};
use std::path::Path;

#[derive(Subcommand)]
pub enum JobSubcommand {
    /// Queue execution of a recorded decision
    EnqueueDecision {
        decision_id: String,
        #[arg(long)]
        org: String,
    },

    /// Queue a playbook step advance
    EnqueuePlaybook {
        #[arg(long)]
        run: String,
        #[arg(long)]
        step: String,
        #[arg(long)]
        org: String,
    },

    /// List jobs, newest first
    List {
        #[arg(long)]
        org: Option<String>,
        /// QUEUED | RUNNING | SUCCESS | FAILED | DEAD_LETTER | CANCELLED
        #[arg(long)]
        status: Option<String>,
        /// EXECUTE_DECISION | ADVANCE_PLAYBOOK_STEP
        #[arg(long = "type")]
        job_type: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Per-status job counts
    Counts {
        #[arg(long)]
        org: Option<String>,
    },

    /// Show one job
    Show { id: String },

    /// Requeue a FAILED or DEAD_LETTER job
    Retry {
        id: String,
        /// Raise the attempt budget
        #[arg(long)]
        max_attempts: Option<u32>,
    },

    /// Cancel a QUEUED or RUNNING job
    Cancel { id: String },
}

pub fn run(root: &Path, subcmd: JobSubcommand, json: bool) -> anyhow::Result<()> {
    let gov = super::open(root)?;
    match subcmd {
        JobSubcommand::EnqueueDecision { decision_id, org } => {
            let id = super::parse_id("decision", &decision_id)?;
            let job = gov.jobs.enqueue_execute_decision(id, &org)?;
            emit(json, &job, |j| println!("queued job {}", j.id))
        }
        JobSubcommand::EnqueuePlaybook { run, step, org } => {
            let job = gov.jobs.enqueue_playbook_step(&run, &step, &org)?;
            emit(json, &job, |j| println!("queued job {}", j.id))
        }
        JobSubcommand::List {
            org,
            status,
            job_type,
            limit,
        } => {
            let filter = JobFilter {
                organization_id: org,
                status: status.as_deref().map(str::parse).transpose()?,
                job_type: job_type.as_deref().map(str::parse).transpose()?,
                limit,
            };
            let jobs = gov.jobs.list_jobs(&filter)?;
            if json {
                return print_json(&jobs);
            }
            if jobs.is_empty() {
                println!("no jobs");
                return Ok(());
            }
            print_table(
                &["ID", "TYPE", "STATUS", "ATTEMPTS", "ORG", "UPDATED"],
                jobs.iter()
                    .map(|j| {
                        vec![
                            j.id.to_string(),
                            j.job_type().to_string(),
                            j.status.to_string(),
                            format!("{}/{}", j.attempts, j.max_attempts),
                            j.organization_id.clone(),
                            short_time(&j.updated_at),
                        ]
                    })
                    .collect(),
            );
            Ok(())
        }
        JobSubcommand::Counts { org } => {
            let counts = gov.jobs.job_counts(org.as_deref())?;
            emit(json, &counts, |c| {
                for (status, n) in c {
                    println!("{status:<12} {n}");
                }
            })
        }
        JobSubcommand::Show { id } => {
            let job = gov.jobs.get_job(super::parse_id("job", &id)?)?;
            emit(json, &job, print_job)
        }
        JobSubcommand::Retry { id, max_attempts } => {
            let job = gov
                .jobs
                .retry_job(super::parse_id("job", &id)?, max_attempts)?;
            emit(json, &job, |j| println!("job {} requeued ({} attempts allowed)", j.id, j.max_attempts))
        }
        JobSubcommand::Cancel { id } => {
            let job = gov.jobs.cancel_job(super::parse_id("job", &id)?)?;
            emit(json, &job, |j| println!("job {} cancelled", j.id))
        }
    }
}

fn print_job(j: &AsyncJob) {
    println!("job:       {}", j.id);
    println!("type:      {}", j.job_type());
    match &j.payload {
        JobPayload::ExecuteDecision { decision_id } => println!("decision:  {decision_id}"),
        JobPayload::AdvancePlaybookStep { run_id, step_id } => {
            println!("playbook:  {run_id} step {step_id}")
        }
    }
    println!("status:    {}", j.status);
    println!("attempts:  {}/{}", j.attempts, j.max_attempts);
    println!("org:       {}", j.organization_id);
    println!("available: {}", short_time(&j.available_at));
    println!("error:     {}", or_dash(j.last_error.as_deref()));
}
