//! Admin socket client for the Redfire B2BUA

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::time::timeout;

#[derive(Parser)]
#[command(name = "b2bua-cli")]
#[command(about = "Redfire B2BUA admin interface client")]
#[command(version = redfire_b2bua::VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Admin socket of the running B2BUA
    #[arg(short, long, env = "B2BUA_ADMIN_SOCKET", default_value = "/var/run/redfire-b2bua.sock")]
    socket: PathBuf,

    /// Seconds to wait for a reply
    #[arg(long, default_value = "5")]
    timeout: u64,
}

#[derive(Subcommand)]
enum Commands {
    /// Show active calls
    List,
    /// Show in-memory transactions
    Transactions {
        /// Only transactions older than this many seconds
        #[arg(long)]
        min: Option<f64>,
        /// Shortcut for --min 60
        #[arg(long, conflicts_with = "min")]
        long: bool,
    },
    /// Disconnect calls by Call-ID, or every call with "*"
    Disconnect { call_id: String },
    /// Expire a relayed call by its numeric id
    Expire { id: u64 },
    /// Send a raw command line
    Raw { line: Vec<String> },
}

impl Commands {
    fn to_line(&self) -> String {
        match self {
            Commands::List => "l".to_string(),
            Commands::Transactions { long: true, .. } => "llt".to_string(),
            Commands::Transactions { min: Some(min), .. } => format!("lt {}", min),
            Commands::Transactions { .. } => "lt".to_string(),
            Commands::Disconnect { call_id } => format!("d {}", call_id),
            Commands::Expire { id } => format!("r {}", id),
            Commands::Raw { line } => line.join(" "),
        }
    }
}

async fn send_command(socket: &PathBuf, line: &str, wait: Duration) -> Result<String> {
    let mut stream = UnixStream::connect(socket)
        .await
        .with_context(|| format!("cannot connect to {}", socket.display()))?;

    // The server closes after "q", which ends the reply
    stream.write_all(format!("{}\nq\n", line).as_bytes()).await?;

    let mut reply = String::new();
    timeout(wait, stream.read_to_string(&mut reply))
        .await
        .context("timed out waiting for reply")??;
    Ok(reply)
}

fn print_reply(reply: &str) {
    for line in reply.lines() {
        if line.starts_with("ERROR") {
            println!("{}", line.red());
        } else if line == "OK" {
            println!("{}", line.green());
        } else if line.starts_with("In-memory") || line.starts_with("Total:") {
            println!("{}", line.bold().blue());
        } else {
            println!("{}", line);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let line = cli.command.to_line();
    if line.trim().is_empty() {
        bail!("empty command");
    }

    let reply = send_command(&cli.socket, &line, Duration::from_secs(cli.timeout)).await?;
    print_reply(&reply);

    if reply.starts_with("ERROR") {
        std::process::exit(1);
    }
    Ok(())
}
