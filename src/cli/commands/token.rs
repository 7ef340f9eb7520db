use chrono::Duration;
use clap::Subcommand;
use serde_json::json;
use uuid::Uuid;

use crate::auth::{generate_jwt, Claims};
use crate::cli::OutputFormat;
use crate::config;

#[derive(Subcommand)]
pub enum TokenCommands {
    #[command(about = "Mint a development access token signed with the configured secret")]
    Mint {
        #[arg(long, help = "User id (sub claim)")]
        user_id: Uuid,
        #[arg(long, help = "Email claim")]
        email: String,
        #[arg(long, help = "Lifetime in hours (defaults to SECURITY_JWT_EXPIRY_HOURS)")]
        hours: Option<i64>,
    },
}

pub async fn handle(cmd: TokenCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        TokenCommands::Mint { user_id, email, hours } => {
            let security = &config::config().security;
            let hours = hours.unwrap_or(security.jwt_expiry_hours as i64);
            let claims = Claims::new(user_id, email, Duration::hours(hours));
            let expires_at = claims.expiry();
            let token = generate_jwt(&claims, &security.jwt_secret)?;

            match output_format {
                OutputFormat::Json => println!(
                    "{}",
                    serde_json::to_string_pretty(&json!({
                        "token": token,
                        "user_id": user_id,
                        "expires_at": expires_at,
                    }))?
                ),
                // Bare token so it can be captured into GATE_TOKEN
                OutputFormat::Text => println!("{}", token),
            }
            Ok(())
        }
    }
}
