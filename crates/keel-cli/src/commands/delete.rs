//! Resource deletion command

use crate::client::KeelClient;
use crate::error::{CliError, CliResult};
use crate::output::{print_error, print_success};
use keel_types::ResourceKind;

/// Delete one resource, confirming first unless `--yes` was given.
pub async fn execute(kind: &str, name: &str, yes: bool, client: &KeelClient) -> CliResult<()> {
    let kind: ResourceKind = kind.parse().map_err(
        |e: keel_types::resource::UnknownKind| CliError::InvalidInput(e.to_string()),
    )?;

    if !yes {
        let prompt = if kind == ResourceKind::Workload {
            format!(
                "Delete {}/{}? Its instances will be gracefully stopped.",
                kind, name
            )
        } else {
            format!("Delete {}/{}?", kind, name)
        };

        let confirm = dialoguer::Confirm::new()
            .with_prompt(prompt)
            .default(false)
            .interact()
            .unwrap_or(false);

        if !confirm {
            print_error("Aborted");
            return Ok(());
        }
    }

    let outcome = client.delete_resource(kind, name).await?;
    if outcome.deleted {
        print_success(&format!("Deleted {}/{}", kind, name));
    }
    Ok(())
}
