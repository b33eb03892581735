//! Workload scaling command

use crate::client::KeelClient;
use crate::error::CliResult;
use crate::output::print_success;

/// Scale a workload to a new replica count.
pub async fn execute(
    workload: &str,
    replicas: u32,
    expected_generation: Option<u64>,
    client: &KeelClient,
) -> CliResult<()> {
    let outcome = client
        .scale_workload(workload, replicas, expected_generation)
        .await?;

    print_success(&format!(
        "Scaled workload {} to {} replicas (generation {})",
        outcome.workload, outcome.replicas, outcome.generation
    ));
    Ok(())
}
