//! Manifest apply command

use crate::client::KeelClient;
use crate::error::CliResult;
use crate::output::print_success;
use serde::Deserialize;
use std::io::Read;

/// Apply a manifest from a file, or from stdin when the path is `-`.
pub async fn execute(file: &str, client: &KeelClient) -> CliResult<()> {
    let manifest = if file == "-" {
        let mut buffer = String::new();
        std::io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        std::fs::read_to_string(file)?
    };

    // Syntax-check locally so a malformed file fails before the request.
    // Semantic validation stays with the daemon.
    for document in serde_yaml::Deserializer::from_str(&manifest) {
        serde_yaml::Value::deserialize(document)?;
    }

    let response = client.apply_manifest(&manifest).await?;

    for outcome in &response.applied {
        let verb = if outcome.created {
            "created"
        } else if outcome.changed {
            "configured"
        } else {
            "unchanged"
        };
        print_success(&format!(
            "{}/{} {} (generation {})",
            outcome.kind, outcome.name, verb, outcome.generation
        ));
    }

    Ok(())
}
