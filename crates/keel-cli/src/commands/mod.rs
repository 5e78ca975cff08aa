pub mod journal_tail;
pub mod replay;
pub mod verify;

use anyhow::Result;
use keel_state::{Deployment, Digest};
use serde_json::{Value, json};

/// Fingerprint of a deployment's contents. The manifest is left out so replays of the
/// same journal agree regardless of when they ran.
pub fn content_digest(deployment: &Deployment) -> Result<Digest> {
    Ok(Digest::of_cbor(&(
        &deployment.secrets_providers,
        &deployment.resources,
        &deployment.pending_operations,
    ))?)
}

pub fn deployment_summary(deployment: &Deployment) -> Result<Value> {
    let pending: Vec<Value> = deployment
        .pending_operations
        .iter()
        .map(|op| json!({ "urn": op.resource.urn, "type": op.ty }))
        .collect();
    Ok(json!({
        "resources": deployment.resources.len(),
        "pending_operations": pending,
        "digest": content_digest(deployment)?.to_hex(),
        "version": deployment.manifest.version,
    }))
}

pub fn render_summary_human(title: &str, summary: &Value) {
    println!("{title}");
    println!("  resources: {}", summary["resources"]);
    println!("  digest:    {}", summary["digest"].as_str().unwrap_or("?"));
    let pending = summary["pending_operations"]
        .as_array()
        .cloned()
        .unwrap_or_default();
    if pending.is_empty() {
        println!("  pending:   none");
        return;
    }
    println!("  pending:   {}", pending.len());
    for op in pending {
        println!(
            "    {} {}",
            op["type"].as_str().unwrap_or("?"),
            op["urn"].as_str().unwrap_or("?")
        );
    }
}
