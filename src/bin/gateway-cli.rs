use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "gateway-cli")]
#[command(about = "Management CLI for the command gateway", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    /// Admin API key
    #[arg(short, long, env = "GATEWAY_ADMIN_KEY", default_value = "")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check gateway status and registered commands
    Status,
    /// List recorded security violations, oldest first
    Violations,
    /// List recorded errors, oldest first
    Errors,
    /// Empty the violation history
    ClearViolations,
    /// Empty the error history
    ClearErrors,
    /// Fetch an anti-forgery token for a user session
    Token {
        /// Session value configured for the user
        #[arg(short, long)]
        session: String,
    },
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

    let res = match cli.command {
        Commands::Status => {
            client.get(format!("{}/admin/status", cli.url))
                .headers(headers)
                .send()
                .await?
        }
        Commands::Violations => {
            client.get(format!("{}/admin/violations", cli.url))
                .headers(headers)
                .send()
                .await?
        }
        Commands::Errors => {
            client.get(format!("{}/admin/errors", cli.url))
                .headers(headers)
                .send()
                .await?
        }
        Commands::ClearViolations => {
            client.delete(format!("{}/admin/violations", cli.url))
                .headers(headers)
                .send()
                .await?
        }
        Commands::ClearErrors => {
            client.delete(format!("{}/admin/errors", cli.url))
                .headers(headers)
                .send()
                .await?
        }
        Commands::Token { session } => {
            client.get(format!("{}/token", cli.url))
                .bearer_auth(session)
                .send()
                .await?
        }
    };
    print_response(res).await?;

    Ok(())
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: gateway returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
