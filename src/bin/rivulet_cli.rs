use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rivulet::{ConnectOptions, IndexPolicy};

#[derive(Parser)]
#[command(name = "rivulet-cli")]
#[command(about = "Operational CLI for a Rivulet channel")]
struct Cli {
    /// Backend connect URL, e.g. redis://localhost:6379/0
    #[arg(long, env = "RIVULET_URL")]
    url: String,

    /// Client id. Defaults to a freshly generated UUID.
    #[arg(long)]
    client_id: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Round-trip check that the backend is reachable.
    Ping,
    /// Append one message to a channel.
    Write {
        #[arg(long)]
        channel: String,
        #[arg(long)]
        data: String,
    },
    /// Sweep all subscriptions once and print new messages.
    Read {
        #[arg(long, default_value_t = 512)]
        message_limit: u64,
    },
    /// Subscribe to one or more channels.
    Subscribe {
        #[arg(long, value_delimiter = ',')]
        channels: Vec<String>,
        #[arg(long, default_value = "current")]
        policy: String,
    },
    /// Unsubscribe from one or more channels.
    Unsubscribe {
        #[arg(long, value_delimiter = ',')]
        channels: Vec<String>,
    },
    /// List live subscriptions.
    Subscriptions,
    /// Deterministically reclaim a channel's fully-consumed backlog.
    Compact {
        #[arg(long)]
        channel: String,
    },
}

fn parse_policy(name: &str) -> Result<IndexPolicy> {
    match name.to_ascii_lowercase().as_str() {
        "earliest" => Ok(IndexPolicy::Earliest),
        "current" => Ok(IndexPolicy::Current),
        "latest" => Ok(IndexPolicy::Latest),
        other => anyhow::bail!("unknown policy {other:?}, expected earliest|current|latest"),
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut client = rivulet::connect(&cli.url, cli.client_id, &[], ConnectOptions::default())
        .context("failed to connect to the backend")?;

    match cli.command {
        Commands::Ping => {
            let alive = client.ping()?;
            println!("ping: {alive}");
        }
        Commands::Write { channel, data } => {
            let envelope = client.write_default(&channel, &data)?;
            println!("wrote id {} to {channel}", envelope.id);
        }
        Commands::Read { message_limit } => {
            let batches = client.read(message_limit)?;
            for (channel, envelopes) in batches {
                for envelope in envelopes {
                    println!("{channel}\t{}\t{}\t{}", envelope.id, envelope.src, envelope.data);
                }
            }
        }
        Commands::Subscribe { channels, policy } => {
            let policy = parse_policy(&policy)?;
            client.subscribe(&channels, policy, rivulet::config::DEFAULT_SUBSCRIBE_LOCK_TIMEOUT_MS)?;
            println!("subscribed to {}", channels.join(","));
        }
        Commands::Unsubscribe { channels } => {
            client.unsubscribe(&channels)?;
            println!("unsubscribed from {}", channels.join(","));
        }
        Commands::Subscriptions => {
            for channel in client.subscriptions()? {
                println!("{channel}");
            }
        }
        Commands::Compact { channel } => {
            client.compact(&channel)?;
            println!("compacted {channel}");
        }
    }

    Ok(())
}
