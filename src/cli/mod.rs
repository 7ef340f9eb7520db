pub mod client;
pub mod commands;
pub mod utils;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

use client::GateClient;

pub const DEFAULT_SERVER: &str = "http://localhost:3000";

#[derive(Parser)]
#[command(name = "gate")]
#[command(about = "SolidUnion Gate CLI - resolve sessions and manage roles against a gate server")]
#[command(version)]
pub struct Cli {
    #[arg(long, global = true, help = "Gate server base URL (falls back to GATE_SERVER)")]
    pub server: Option<String>,

    #[arg(long, global = true, help = "Bearer access token (falls back to GATE_TOKEN)")]
    pub token: Option<String>,

    #[arg(long, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Resolve a guarded route for the current token")]
    Resolve {
        #[arg(long, help = "Role the route requires (buyer, seller, admin, landlord)")]
        role: Option<String>,
    },

    #[command(about = "Show where the current token lands after sign-in")]
    Landing,

    #[command(about = "Choose the role for the current token's user (one time only)")]
    ChooseRole {
        #[arg(help = "Role to assign")]
        role: String,
    },

    #[command(about = "Sign the current token out of the server")]
    SignOut,

    #[command(about = "Check server health status from the /health endpoint")]
    Health,

    #[command(about = "Access token utilities")]
    Token {
        #[command(subcommand)]
        cmd: commands::token::TokenCommands,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_cli(cli: &Cli) -> Self {
        if cli.json {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        }
    }
}

impl Cli {
    pub fn server_url(&self) -> String {
        self.server
            .clone()
            .or_else(|| std::env::var("GATE_SERVER").ok())
            .unwrap_or_else(|| DEFAULT_SERVER.to_string())
    }

    pub fn bearer_token(&self) -> Option<String> {
        self.token
            .clone()
            .or_else(|| std::env::var("GATE_TOKEN").ok())
            .filter(|t| !t.trim().is_empty())
    }
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let output_format = OutputFormat::from_cli(&cli);
    let server = cli.server_url();
    let token = cli.bearer_token();
    let client = || GateClient::new(&server, token.clone());

    match cli.command {
        Commands::Resolve { role } => {
            commands::session::resolve(&client()?, role.as_deref(), output_format).await
        }
        Commands::Landing => commands::session::landing(&client()?, output_format).await,
        Commands::ChooseRole { role } => {
            commands::session::choose_role(&client()?, &role, output_format).await
        }
        Commands::SignOut => commands::session::sign_out(&client()?, output_format).await,
        Commands::Health => commands::session::health(&client()?, output_format).await,
        Commands::Token { cmd } => commands::token::handle(cmd, output_format).await,
    }
}
