#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use tempfile::TempDir;

fn govern(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("govern").unwrap();
    cmd.current_dir(dir.path())
        .env("GOVERN_ROOT", dir.path())
        .env_remove("RUST_LOG");
    cmd
}

fn json_out(dir: &TempDir, args: &[&str]) -> Value {
    let out = govern(dir).arg("--json").args(args).assert().success();
    serde_json::from_slice(&out.get_output().stdout).unwrap()
}

fn init(dir: &TempDir) {
    govern(dir).arg("init").assert().success();
}

fn write_proposal(dir: &TempDir, id: &str, action: &str, risk: &str, requires_approval: bool) {
    let body = serde_json::json!({
        "proposal_id": id,
        "organization_id": "org-1",
        "project_id": "proj-1",
        "action_type": action,
        "scope": "PROJECT",
        "payload_preview": {"title": "Follow up with vendor", "description": "Weekly sync"},
        "risk_level": risk,
        "requires_approval": requires_approval,
        "created_at": "2026-01-05T09:00:00Z"
    });
    let path = dir.path().join(format!("{id}.json"));
    std::fs::write(&path, body.to_string()).unwrap();
    govern(dir)
        .args(["proposal", "import"])
        .arg(&path)
        .assert()
        .success();
}

/// Org with an admin, ASSISTED level and AUTOPILOT ceiling.
fn setup_org(dir: &TempDir, level: &str) {
    init(dir);
    govern(dir)
        .args(["org", "set-admin", "--org", "org-1", "--user", "u-admin"])
        .assert()
        .success();
    govern(dir)
        .args(["policy", "set", "--org", "org-1", "--level", level, "--max", "AUTOPILOT"])
        .assert()
        .success();
}

// ---------------------------------------------------------------------------
// init / config
// ---------------------------------------------------------------------------

#[test]
fn init_creates_data_dir() {
    let dir = TempDir::new().unwrap();
    govern(&dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("created: .govern/config.yaml"));
    assert!(dir.path().join(".govern/config.yaml").exists());
    assert!(dir.path().join(".govern/governance.redb").exists());
}

#[test]
fn init_is_idempotent() {
    let dir = TempDir::new().unwrap();
    init(&dir);
    govern(&dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("exists:  .govern/config.yaml"));
}

#[test]
fn commands_require_init() {
    let dir = TempDir::new().unwrap();
    govern(&dir)
        .args(["job", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not initialized"));
}

#[test]
fn config_validate_flags_errors() {
    let dir = TempDir::new().unwrap();
    init(&dir);
    govern(&dir)
        .args(["config", "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Config is valid"));

    std::fs::write(
        dir.path().join(".govern/config.yaml"),
        "version: 1\njobs:\n  max_attempts: 0\n",
    )
    .unwrap();
    govern(&dir)
        .args(["config", "validate"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("jobs.max_attempts must be at least 1"));
}

// ---------------------------------------------------------------------------
// policy
// ---------------------------------------------------------------------------

#[test]
fn project_override_is_clamped_by_ceiling() {
    let dir = TempDir::new().unwrap();
    init(&dir);
    govern(&dir)
        .args(["policy", "set", "--org", "org-1", "--level", "ASSISTED", "--max", "PROACTIVE"])
        .assert()
        .success();
    govern(&dir)
        .args(["policy", "set", "--org", "org-1", "--project", "proj-1", "--level", "AUTOPILOT"])
        .assert()
        .success();

    let p = json_out(&dir, &["policy", "show", "--org", "org-1", "--project", "proj-1"]);
    assert_eq!(p["policy_level"], "PROACTIVE");
    assert_eq!(p["clamped"], true);
}

#[test]
fn regulatory_mode_denies_with_reason() {
    let dir = TempDir::new().unwrap();
    setup_org(&dir, "PROACTIVE");
    govern(&dir)
        .args(["org", "regulatory", "--org", "org-1"])
        .assert()
        .success();

    let check = json_out(&dir, &["policy", "check", "--org", "org-1", "--action", "TASK_CREATE"]);
    assert_eq!(check["allowed"], false);
    assert!(check["reason"]
        .as_str()
        .unwrap()
        .contains("regulatory mode forces ADVISORY"));
}

#[test]
fn invalid_policy_level_is_rejected() {
    let dir = TempDir::new().unwrap();
    init(&dir);
    govern(&dir)
        .args(["policy", "set", "--org", "org-1", "--level", "TURBO"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid policy level"));
}

// ---------------------------------------------------------------------------
// End-to-end lifecycle
// ---------------------------------------------------------------------------

#[test]
fn proposal_to_executed_job() {
    let dir = TempDir::new().unwrap();
    setup_org(&dir, "ASSISTED");
    write_proposal(&dir, "p-1", "TASK_CREATE", "MEDIUM", true);

    let sub = json_out(&dir, &["proposal", "submit", "p-1", "--reviewer", "u-rev"]);
    assert_eq!(sub["outcome"]["outcome"], "REQUIRES_APPROVAL");
    assert_eq!(sub["assignment"]["status"], "PENDING");

    let mine = json_out(&dir, &["approval", "mine", "--user", "u-rev", "--org", "org-1"]);
    assert_eq!(mine.as_array().unwrap().len(), 1);

    let decided = json_out(
        &dir,
        &[
            "decision", "record", "--proposal", "p-1", "--org", "org-1", "--decision", "MODIFIED",
            "--by", "u-rev", "--payload", r#"{"title":"Call vendor today"}"#,
        ],
    );
    assert_eq!(decided["completed_assignment"]["status"], "DONE");
    let job_id = decided["job"]["id"].as_str().unwrap().to_string();

    govern(&dir).args(["worker", "--once"]).assert().success();

    let job = json_out(&dir, &["job", "show", &job_id]);
    assert_eq!(job["status"], "SUCCESS");
    assert_eq!(job["attempts"], 1);

    let mine = json_out(&dir, &["approval", "mine", "--user", "u-rev", "--org", "org-1"]);
    assert!(mine.as_array().unwrap().is_empty());
}

#[test]
fn second_decision_conflicts() {
    let dir = TempDir::new().unwrap();
    setup_org(&dir, "ASSISTED");
    write_proposal(&dir, "p-1", "TASK_CREATE", "MEDIUM", true);

    let record = |decision: &str| {
        let mut cmd = govern(&dir);
        cmd.args([
            "decision", "record", "--proposal", "p-1", "--org", "org-1", "--decision", decision,
            "--by", "u-rev",
        ]);
        cmd
    };
    record("REJECTED").assert().success();
    record("APPROVED")
        .assert()
        .failure()
        .stderr(predicate::str::contains("already has a decision"));
}

#[test]
fn modified_field_outside_allowlist_is_rejected() {
    let dir = TempDir::new().unwrap();
    setup_org(&dir, "ASSISTED");
    write_proposal(&dir, "p-1", "TASK_CREATE", "MEDIUM", true);

    govern(&dir)
        .args([
            "decision", "record", "--proposal", "p-1", "--org", "org-1", "--decision", "MODIFIED",
            "--by", "u-rev", "--payload", r#"{"budget":9000}"#,
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("'budget' may not be modified"));
}

#[test]
fn cross_tenant_decision_is_refused() {
    let dir = TempDir::new().unwrap();
    setup_org(&dir, "ASSISTED");
    write_proposal(&dir, "p-1", "TASK_CREATE", "MEDIUM", true);

    govern(&dir)
        .args([
            "decision", "record", "--proposal", "p-1", "--org", "org-2", "--decision", "APPROVED",
            "--by", "u-rev",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("organization mismatch"));
}

#[test]
fn autopilot_runs_low_risk_without_review() {
    let dir = TempDir::new().unwrap();
    setup_org(&dir, "AUTOPILOT");
    write_proposal(&dir, "p-auto", "TASK_CREATE", "LOW", false);

    let sub = json_out(&dir, &["proposal", "submit", "p-auto"]);
    assert_eq!(sub["outcome"]["outcome"], "AUTO_RUN");
    assert_eq!(sub["decision"]["decided_by_user_id"], "system:autopilot");
    assert_eq!(sub["job"]["status"], "QUEUED");
}

#[test]
fn policy_denied_submission_fails() {
    let dir = TempDir::new().unwrap();
    setup_org(&dir, "ASSISTED");
    write_proposal(&dir, "p-meet", "MEETING_SCHEDULE", "LOW", true);

    govern(&dir)
        .args(["proposal", "submit", "p-meet"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("MEETING_SCHEDULE requires PROACTIVE policy level"));
}

// ---------------------------------------------------------------------------
// jobs / audit / outbox
// ---------------------------------------------------------------------------

#[test]
fn cancel_then_retry_is_rejected() {
    let dir = TempDir::new().unwrap();
    setup_org(&dir, "ASSISTED");
    let job = json_out(
        &dir,
        &["job", "enqueue-playbook", "--run", "run-1", "--step", "s-1", "--org", "org-1"],
    );
    let id = job["id"].as_str().unwrap().to_string();

    let cancelled = json_out(&dir, &["job", "cancel", &id]);
    assert_eq!(cancelled["status"], "CANCELLED");
    govern(&dir)
        .args(["job", "retry", &id])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid transition"));

    let counts = json_out(&dir, &["job", "counts", "--org", "org-1"]);
    assert_eq!(counts["CANCELLED"], 1);
}

#[test]
fn audit_requires_scope() {
    let dir = TempDir::new().unwrap();
    init(&dir);
    govern(&dir).args(["decision", "audit"]).assert().failure();

    let rows = json_out(&dir, &["decision", "audit", "--all-orgs"]);
    assert!(rows.as_array().unwrap().is_empty());
}

#[test]
fn assignment_queues_approval_notification() {
    let dir = TempDir::new().unwrap();
    setup_org(&dir, "ASSISTED");
    write_proposal(&dir, "p-1", "TASK_CREATE", "MEDIUM", true);
    govern(&dir)
        .args(["approval", "assign", "--proposal", "p-1", "--to", "u-rev", "--sla-hours", "4"])
        .assert()
        .success();

    let stats = json_out(&dir, &["outbox", "stats", "--org", "org-1"]);
    assert_eq!(stats["by_type"]["APPROVAL_DUE"], 1);

    govern(&dir).args(["worker", "--once"]).assert().success();
    let stats = json_out(&dir, &["outbox", "stats", "--org", "org-1"]);
    assert_eq!(stats["by_status"]["SENT"], 1);
}

#[test]
fn oversized_sla_is_an_input_error() {
    let dir = TempDir::new().unwrap();
    setup_org(&dir, "ASSISTED");
    write_proposal(&dir, "p-1", "TASK_CREATE", "MEDIUM", true);
    govern(&dir)
        .args(["approval", "assign", "--proposal", "p-1", "--to", "u-rev", "--sla-hours", "4294967295"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("sla_hours must be between 1 and 8760"));

    // The rejected assignment left the proposal free for a valid one.
    govern(&dir)
        .args(["approval", "assign", "--proposal", "p-1", "--to", "u-rev", "--sla-hours", "8760"])
        .assert()
        .success();
}

#[test]
fn opted_out_user_gets_no_approval_message() {
    let dir = TempDir::new().unwrap();
    setup_org(&dir, "ASSISTED");
    write_proposal(&dir, "p-1", "TASK_CREATE", "MEDIUM", true);
    let pref = json_out(
        &dir,
        &["outbox", "prefs", "--user", "u-rev", "--org", "org-1", "--type", "APPROVAL_DUE", "--disable"],
    );
    assert_eq!(pref["enabled"], false);

    govern(&dir)
        .args(["approval", "assign", "--proposal", "p-1", "--to", "u-rev"])
        .assert()
        .success();
    let stats = json_out(&dir, &["outbox", "stats"]);
    assert_eq!(stats["total"], 0);
}
