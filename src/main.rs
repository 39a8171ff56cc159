//! Redfire B2BUA command line: configuration tooling and route checks

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;

use redfire_b2bua::{
    config::B2buaConfig,
    interfaces::SystemResolver,
    services::B2bRoute,
    utils::setup_logging,
    Result,
};

#[derive(Parser)]
#[command(name = "redfire-b2bua")]
#[command(about = "Signaling back-to-back user agent engine")]
#[command(version = redfire_b2bua::VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "B2BUA_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate configuration
    ValidateConfig,
    /// Generate default configuration
    GenerateConfig {
        /// Output file path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Parse a route string and show what a call would use
    CheckRoute {
        /// Route, e.g. "gw.example.net:5070;credit-time=300;hs_scodes=486"
        spec: String,
        /// Resolve the host through the system resolver
        #[arg(short, long)]
        resolve: bool,
        /// Called number to customize the route with
        #[arg(long)]
        cld: Option<String>,
        /// Calling number to customize the route with
        #[arg(long)]
        cli: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::GenerateConfig { output } => generate_default_config(output.clone()),
        Commands::ValidateConfig => {
            let config = load_configuration(&cli)?;
            let _guard = setup_logging(&config.logging)?;
            validate_configuration(&config)
        }
        Commands::CheckRoute { spec, resolve, cld, cli: caller } => {
            let config = load_configuration(&cli)?;
            check_route(&config, spec, *resolve, cld.clone(), caller.clone()).await
        }
    }
}

fn load_configuration(cli: &Cli) -> Result<B2buaConfig> {
    let config = match &cli.config {
        Some(config_path) => B2buaConfig::load_from_file(config_path)?,
        None => B2buaConfig::load_from_env().unwrap_or_else(|_| B2buaConfig::default_config()),
    };
    config.validate()?;
    Ok(config)
}

fn validate_configuration(config: &B2buaConfig) -> Result<()> {
    info!("Validating configuration...");

    config.validate()?;

    println!("✓ Configuration is valid");
    println!("  Node ID: {}", config.general.node_id);
    println!("  SIP Port: {}", config.sip.listen_port);
    println!(
        "  Static Route: {}",
        config.routing.static_route.as_deref().unwrap_or("none")
    );
    println!("  Authorization: {}", config.auth.enabled);
    println!("  Digest Auth: {}", config.auth.digest_auth);
    println!("  Accounting: {}", config.accounting.enabled);
    println!("  Media Relay: {}", config.media_relay.enabled);
    println!("  Admin Socket: {}", config.admin.socket_path);

    Ok(())
}

fn generate_default_config(output_path: Option<PathBuf>) -> Result<()> {
    let config = B2buaConfig::default_config();
    let toml_content = toml::to_string_pretty(&config)
        .map_err(|e| redfire_b2bua::Error::internal(format!("Failed to serialize config: {}", e)))?;

    match output_path {
        Some(path) => {
            std::fs::write(&path, toml_content)?;
            println!("✓ Default configuration written to: {}", path.display());
        }
        None => {
            println!("{}", toml_content);
        }
    }

    Ok(())
}

async fn check_route(
    config: &B2buaConfig,
    spec: &str,
    resolve: bool,
    cld: Option<String>,
    caller: Option<String>,
) -> Result<()> {
    let mut route = B2bRoute::parse(spec, config.sip.listen_port)?;
    route.customize(
        1,
        cld.as_deref(),
        caller.as_deref(),
        None,
        &[],
        config.routing.max_credit_time,
    );

    println!("✓ Route parsed: {}", route);
    println!("  Host: {}:{}", route.host(), route.port);
    println!("  Called: {}", route.cld.as_deref().unwrap_or("-"));
    println!("  Calling: {}", route.cli.as_deref().unwrap_or("-"));
    println!(
        "  Credit Time: {}",
        route.credit_time.map_or("unlimited".to_string(), |t| format!("{}s", t))
    );
    println!("  Expires: {:?}", route.expires);
    println!("  Hunt Stop Codes: {:?}", route.huntstop_scodes);
    println!("  Forward On Fail: {}", route.forward_on_fail);
    println!("  Usable: {}", route.is_usable());

    if resolve && !route.is_caller_host() {
        route.resolve(&SystemResolver).await?;
        for addr in &route.addresses {
            println!("  Address: {}", addr);
        }
    }

    Ok(())
}
