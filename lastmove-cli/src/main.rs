use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod activity_cmd;
mod config;
mod notify_cmd;
mod state;
mod user_cmd;

#[derive(Parser, Debug)]
#[command(
    name = "lastmove",
    version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("LASTMOVE_BUILD_SHA"), ")"),
    about = "LastMove habit reminders: urgency analysis and web push delivery"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Manage ~/.lastmove/config.toml
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Users and push subscriptions
    User {
        #[command(subcommand)]
        command: user_cmd::UserCommand,
    },

    /// Recurring activities and recorded moves
    Activity {
        #[command(subcommand)]
        command: activity_cmd::ActivityCommand,
    },

    /// Analysis, dispatch and delivery stats
    Notify {
        #[command(subcommand)]
        command: notify_cmd::NotifyCommand,
    },

    /// Run checks at every regular time until interrupted
    Serve,
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Write the default config if none exists
    Init,

    /// Print the effective config
    Show,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("lastmove=info,lastmove_core=info,lastmove_store=info,lastmove_push=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Config { command } => match command {
            ConfigCommand::Init => config::init_config()?,
            ConfigCommand::Show => config::show_config()?,
        },
        Command::User { command } => user_cmd::run(command)?,
        Command::Activity { command } => activity_cmd::run(command)?,
        Command::Notify { command } => notify_cmd::run(command).await?,
        Command::Serve => notify_cmd::serve().await?,
    }

    Ok(())
}
