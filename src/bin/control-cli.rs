use clap::{Parser, Subcommand};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "control-cli")]
#[command(about = "Management CLI for the proxy control plane", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8092")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage registered clients
    Clients {
        #[command(subcommand)]
        action: ClientAction,
    },
    /// List heartbeat targets and their liveness
    Heartbeats,
    /// Show the most recent health round
    LastRound,
}

#[derive(Subcommand)]
enum ClientAction {
    /// List registered clients
    List,
    /// Register this machine's address as a client
    Create {
        #[arg(long)]
        name: String,
        #[arg(long)]
        proxy_target: String,
    },
    /// Remove a client
    Delete { id: u64 },
    /// Enable or disable a client
    Toggle { id: u64 },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    let res = match cli.command {
        Commands::Clients { action } => match action {
            ClientAction::List => client.get(format!("{base}/api/clients")).send().await?,
            ClientAction::Create { name, proxy_target } => {
                client
                    .post(format!("{base}/api/clients/create"))
                    .json(&json!({ "name": name, "proxy_target": proxy_target }))
                    .send()
                    .await?
            }
            ClientAction::Delete { id } => {
                client.delete(format!("{base}/api/clients/{id}")).send().await?
            }
            ClientAction::Toggle { id } => {
                client.post(format!("{base}/api/clients/{id}/toggle")).send().await?
            }
        },
        Commands::Heartbeats => client.get(format!("{base}/api/heartbeats")).send().await?,
        Commands::LastRound => {
            client
                .get(format!("{base}/api/heartbeats/last-round"))
                .send()
                .await?
        }
    };

    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: control plane returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        std::process::exit(1);
    }

    if status == reqwest::StatusCode::NO_CONTENT {
        println!("{}", status);
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
