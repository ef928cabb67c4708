use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "guard-cli")]
#[command(about = "Management CLI for upstream-guard", long_about = None)]
struct Cli {
    /// Admin API base URL.
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    /// Admin API key.
    #[arg(short, long, env = "GUARD_ADMIN_KEY")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Version and service counts by degrade state
    Status,
    /// Degrade state and node weights per service
    Services {
        /// Only show this service
        name: Option<String>,
    },
    /// Latest breaker state per node
    Breakers {
        /// Only show entries that are not closed
        #[arg(long)]
        tripped: bool,
    },
}

impl Commands {
    fn path(&self) -> &'static str {
        match self {
            Commands::Status => "/admin/status",
            Commands::Services { .. } => "/admin/services",
            Commands::Breakers { .. } => "/admin/breakers",
        }
    }

    /// Narrow list responses client-side.
    fn filter(&self, json: Value) -> Value {
        match (self, json) {
            (Commands::Services { name: Some(name) }, Value::Array(items)) => Value::Array(
                items
                    .into_iter()
                    .filter(|s| s.get("name").and_then(Value::as_str) == Some(name.as_str()))
                    .collect(),
            ),
            (Commands::Breakers { tripped: true }, Value::Array(items)) => Value::Array(
                items
                    .into_iter()
                    .filter(|b| b.get("state").and_then(Value::as_str) != Some("closed"))
                    .collect(),
            ),
            (_, json) => json,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let res = client
        .get(format!("{}{}", cli.url.trim_end_matches('/'), cli.command.path()))
        .headers(headers)
        .send()
        .await?;

    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        std::process::exit(1);
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&cli.command.filter(json))?);
    Ok(())
}
