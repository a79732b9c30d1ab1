//! Userbot gateway binary.
//!
//! Start the gateway with:
//! ```bash
//! TELEGRAM_BOT_TOKEN=xxx cargo run -p gateway-telegram
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use gateway_core::GatewaySettings;
use gateway_telegram::{create_manager, GatewayBot, MtprotoConnector};
use tracing_subscriber::EnvFilter;

/// Userbot gateway - run plugins on your own Telegram account
#[derive(Parser, Debug)]
#[command(name = "userbot-gateway")]
#[command(about = "Multi-session Telegram userbot gateway with a control bot")]
struct Args {
    /// Data directory (default: ~/.userbot-gateway or $USERBOT_DATA_DIR)
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Liveness endpoint port, 0 disables it
    #[arg(short = 'p', long, default_value = "7860")]
    health_port: u16,

    /// Verbose logging (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let base_dir = args.data_dir.clone().unwrap_or_else(gateway_core::data_dir);

    // Secrets from the data directory first, then the working directory
    let env_path = gateway_core::env_file_in(&base_dir);
    if env_path.exists() {
        let _ = dotenvy::from_path(&env_path);
    }
    let _ = dotenvy::from_filename(".env.local").or_else(|_| dotenvy::dotenv());

    let filter = match args.verbose {
        0 => "gateway_telegram=info,gateway_plugins=info,teloxide=warn",
        1 => "gateway_telegram=debug,gateway_plugins=debug,teloxide=info",
        2 => "gateway_telegram=trace,gateway_plugins=trace,teloxide=debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = GatewaySettings::from_env();
    let manager = create_manager(&base_dir, settings, Arc::new(MtprotoConnector::new()))?;

    let registered = manager.load_sessions().await?;
    tracing::info!(registered, data_dir = %base_dir.display(), "Credential store loaded");

    let report = manager.reconnect_all().await;
    for (user_id, name) in &report.connected {
        tracing::info!(user_id, account = %name, "Session restored");
    }
    for (user_id, reason) in &report.failed {
        tracing::warn!(user_id, reason = %reason, "Session not restored");
    }

    let health_port = (args.health_port != 0).then_some(args.health_port);
    let bot = GatewayBot::new(Arc::clone(&manager), health_port)?;

    match bot.get_me().await {
        Ok(username) => {
            tracing::info!(username = %username, "Bot initialized successfully");
            println!("\nUserbot Gateway");
            println!("   Bot: @{}", username);
            println!("   Sessions: {} restored, {} failed", report.connected.len(), report.failed.len());
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to get bot info");
            manager.shutdown().await;
            return Err(e.into());
        }
    }

    println!("\nOpen Telegram and send /start to begin");
    println!("   Press Ctrl+C to stop\n");

    bot.start_polling().await?;

    Ok(())
}
