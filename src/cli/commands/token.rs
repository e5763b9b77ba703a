use clap::Subcommand;
use serde_json::json;

use crate::auth::{generate_jwt, Claims, TokenGate};
use crate::cli::utils::{output_success, parse_tenant};
use crate::cli::OutputFormat;
use crate::config;

#[derive(Subcommand)]
pub enum TokenCommands {
    #[command(about = "Sign a platform token bound to a tenant")]
    Issue {
        #[arg(long, help = "Tenant namespace")]
        tenant: String,
        #[arg(long, help = "Token subject")]
        subject: String,
        #[arg(long, default_value_t = 3600, help = "Lifetime in seconds")]
        ttl_secs: i64,
    },

    #[command(about = "Run a token through the gate for a tenant")]
    Check {
        #[arg(help = "Bearer token")]
        token: String,
        #[arg(long, help = "Tenant namespace")]
        tenant: String,
    },
}

pub async fn handle(cmd: TokenCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    let security = &config::config().security;
    if security.jwt_secret.is_empty() {
        anyhow::bail!("JWT_SECRET is not configured");
    }

    match cmd {
        TokenCommands::Issue { tenant, subject, ttl_secs } => {
            let tenant = parse_tenant(&tenant)?;
            let claims = Claims::new(
                subject,
                vec![security.platform_audience.clone(), tenant.to_string()],
                chrono::Duration::seconds(ttl_secs),
            );
            let token = generate_jwt(&claims, &security.jwt_secret)?;

            match output_format {
                OutputFormat::Json => output_success(
                    &output_format,
                    "Token issued",
                    Some(json!({ "token": token, "expires_at": claims.expires_at() })),
                ),
                OutputFormat::Text => {
                    println!("{token}");
                    Ok(())
                }
            }
        }
        TokenCommands::Check { token, tenant } => {
            let tenant = parse_tenant(&tenant)?;
            let gate = TokenGate::new(&security.jwt_secret, security.platform_audience.clone());
            let claims = gate.authorize(&token, &tenant)?;
            output_success(
                &output_format,
                &format!("Token accepted for {tenant} (subject {})", claims.sub),
                Some(serde_json::to_value(&claims)?),
            )
        }
    }
}
