use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use assert_cmd::prelude::*;
use keel_journal::{FsPersister, Journal, StepOp, StepRecord};
use keel_state::{
    Deployment, ResourceState, SerializedResource, StateArena, VersionedDeployment,
    deserialize_deployment,
};
use predicates::prelude::*;
use tempfile::TempDir;

fn keel() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("keel"));
    cmd.env_remove("KEEL_JOURNAL_DIR").env("RUST_LOG", "error");
    cmd
}

fn live(name: &str, id: &str) -> ResourceState {
    ResourceState::new(
        "k8s:core:Service".into(),
        format!("urn:pulumi:stage::web::k8s:core:Service::{name}").as_str().into(),
        true,
        id.into(),
    )
}

/// Journal with one created resource and one create still in flight.
fn write_journal(dir: &Path) {
    let arena = StateArena::new();
    let snapshot = deserialize_deployment(&Deployment::empty(), &arena, None).unwrap();
    let persister = Arc::new(FsPersister::open(dir).unwrap());
    let journal = Journal::new(persister, snapshot, None).unwrap();

    let frontend = StepRecord::producing(StepOp::Create, arena.alloc(live("frontend", "svc-1")));
    journal.begin_mutation(&frontend).unwrap().end(&frontend, true).unwrap();
    let backend = StepRecord::producing(StepOp::Create, arena.alloc(live("backend", "")));
    let _in_flight = journal.begin_mutation(&backend).unwrap();
}

fn write_snapshot(path: &Path, resources: Vec<SerializedResource>) {
    let mut deployment = Deployment::empty();
    deployment.resources = resources;
    let bytes = VersionedDeployment::new(deployment).to_json_pretty().unwrap();
    std::fs::write(path, bytes).unwrap();
}

#[test]
fn journal_tail_help_mentions_filters() {
    let output = keel().args(["journal", "tail", "--help"]).output().unwrap();
    assert!(output.status.success());
    let text = String::from_utf8_lossy(&output.stdout);
    for needle in ["--from", "--limit", "--kinds", "--out", "--dir"] {
        assert!(text.contains(needle), "help should mention '{needle}'");
    }
}

#[test]
fn tail_lists_entries_as_json() {
    let tmp = TempDir::new().unwrap();
    write_journal(tmp.path());

    let output = keel()
        .arg("--dir")
        .arg(tmp.path())
        .args(["journal", "tail", "--json", "--kinds", "begin"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let body: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(body["data"]["total"], 3);
    let entries = body["data"]["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["seq"], 1);
    assert_eq!(entries[0]["op"], "create");
    assert_eq!(
        entries[1]["urn"],
        "urn:pulumi:stage::web::k8s:core:Service::backend"
    );
}

#[test]
fn tail_reads_directory_from_env() {
    let tmp = TempDir::new().unwrap();
    write_journal(tmp.path());

    keel()
        .env("KEEL_JOURNAL_DIR", tmp.path())
        .args(["journal", "tail", "--from", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("#2 success op=create old=0 new=1"))
        .stdout(predicate::str::contains("#1 ").not());
}

#[test]
fn replay_reports_pending_and_writes_snapshot() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("journal");
    write_journal(&dir);
    let out = tmp.path().join("recovered.json");

    let output = keel()
        .arg("--dir")
        .arg(&dir)
        .args(["journal", "replay", "--json", "--out"])
        .arg(&out)
        .output()
        .unwrap();
    assert!(output.status.success());
    let body: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(body["data"]["resources"], 1);
    assert_eq!(body["data"]["pending_operations"][0]["type"], "creating");
    assert!(body["data"]["digest"].as_str().unwrap().starts_with("sha256:"));
    assert_eq!(body["warnings"].as_array().unwrap().len(), 1);

    let saved = VersionedDeployment::from_json(&std::fs::read(&out).unwrap()).unwrap();
    assert_eq!(saved.resources.len(), 1);

    keel()
        .args(["snapshot", "verify"])
        .arg(&out)
        .assert()
        .success()
        .stdout(predicate::str::contains("ok"));
}

#[test]
fn replay_digest_is_stable() {
    let tmp = TempDir::new().unwrap();
    write_journal(tmp.path());

    let digest = || {
        let output = keel()
            .arg("--dir")
            .arg(tmp.path())
            .args(["journal", "replay", "--json"])
            .output()
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        body["data"]["digest"].as_str().unwrap().to_string()
    };
    assert_eq!(digest(), digest());
}

#[test]
fn verify_rejects_missing_parent() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("broken.json");
    let mut orphan = SerializedResource::new(
        "urn:pulumi:stage::web::k8s:core:Service::orphan",
        "k8s:core:Service",
        true,
    );
    orphan.parent = "urn:pulumi:stage::web::pulumi:pulumi:Stack::web-stage".into();
    write_snapshot(&path, vec![orphan]);

    keel()
        .args(["snapshot", "verify"])
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("refers to missing parent"))
        .stderr(predicate::str::contains("import it again"));
}

#[test]
fn verify_fails_in_json_mode_too() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("dup.json");
    let twin = SerializedResource::new(
        "urn:pulumi:stage::web::k8s:core:Service::twin",
        "k8s:core:Service",
        true,
    );
    write_snapshot(&path, vec![twin.clone(), twin]);

    keel()
        .args(["snapshot", "verify", "--json"])
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("duplicate resource"));
}
