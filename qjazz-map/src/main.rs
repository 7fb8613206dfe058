mod channel;
mod config;
mod cors;
mod handlers;
mod logger;
mod models;
mod pools;
mod resolver;
mod router;
mod server;
mod services;
mod utils;

use clap::{Parser, Subcommand};
use std::io;
use std::path::PathBuf;

use config::Settings;
use server::serve;

#[derive(Parser)]
#[command(version, author, about, long_about=None)]
#[command(arg_required_else_help = true)]
#[command(styles = clap::builder::styling::Styles::plain())]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print configuration in json format
    Config {
        #[arg(long, short = 'C', value_name = "FILE")]
        conf: Option<PathBuf>,
    },
    /// Run the gateway server
    Serve {
        #[arg(long, short = 'C', value_name = "FILE")]
        conf: Option<PathBuf>,
    },
}

#[actix_web::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    match Cli::parse().command {
        Commands::Config { conf } => {
            let settings = Settings::load(conf.as_deref())?;
            serde_json::to_writer_pretty(io::stdout().lock(), &settings)?;
        }
        Commands::Serve { conf } => {
            let settings = Settings::load(conf.as_deref())?;
            settings.init_logger();
            serve(settings).await?;
        }
    }
    Ok(())
}
