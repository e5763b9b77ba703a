use clap::Subcommand;
use serde_json::json;

use crate::cli::utils::{output_empty_collection, output_success, parse_tenant};
use crate::cli::OutputFormat;
use crate::config;
use crate::staging::StagingArea;

#[derive(Subcommand)]
pub enum StagingCommands {
    #[command(about = "List a tenant's staged files")]
    List {
        #[arg(long, help = "Tenant namespace")]
        tenant: String,
    },

    #[command(about = "Re-derive a tenant's index from its directory and drop abandoned artifacts")]
    Rebuild {
        #[arg(long, help = "Tenant namespace")]
        tenant: String,
    },

    #[command(about = "Discard everything staged for a tenant")]
    Flush {
        #[arg(long, help = "Tenant namespace")]
        tenant: String,
    },
}

pub async fn handle(cmd: StagingCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    let settings = &config::config().staging;
    let area = StagingArea::new(&settings.root, settings.index_file_name.clone())?;

    match cmd {
        StagingCommands::List { tenant } => {
            let tenant = parse_tenant(&tenant)?;
            let entries = area.enumerate(&tenant).await?;
            if entries.is_empty() {
                return output_empty_collection(&output_format, "files", &format!("No files staged for {tenant}"));
            }

            match output_format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&json!({ "files": entries }))?),
                OutputFormat::Text => {
                    for entry in &entries {
                        println!("{:<40} {}", entry.filename, entry.path.display());
                    }
                }
            }
            Ok(())
        }
        StagingCommands::Rebuild { tenant } => {
            let tenant = parse_tenant(&tenant)?;
            let report = area.rebuild(&tenant).await?;
            output_success(
                &output_format,
                &format!(
                    "Rebuilt index for {tenant}: {} entries, {} artifacts removed, {} uploads in flight",
                    report.entries, report.removed_artifacts, report.in_flight
                ),
                Some(serde_json::to_value(report)?),
            )
        }
        StagingCommands::Flush { tenant } => {
            let tenant = parse_tenant(&tenant)?;
            let existed = area.flush(&tenant).await?;
            let message = if existed {
                format!("Flushed staging for {tenant}")
            } else {
                format!("Nothing staged for {tenant}")
            };
            output_success(&output_format, &message, Some(json!({ "existed": existed })))
        }
    }
}
