//! Command-line interface parsing and handling

pub mod model_list;
pub mod say;

use std::error::Error;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::cli::model_list::list_models;
use crate::cli::say::{run_say, SayOptions};
use crate::core::config::data::path_display;
use crate::core::config::Config;

/// Environment variable holding the `tracing` filter directive.
pub const LOG_ENV: &str = "PARLEY_LOG";

#[derive(Parser)]
#[command(name = "parley")]
#[command(version)]
#[command(about = "Talk to AI chat edge functions from the terminal")]
#[command(
    long_about = "Parley drives the chat core from the command line: it sends one prompt \
through the same send, search and streaming paths an interactive client uses and prints \
the reply.\n\n\
Environment Variables:\n\
  PARLEY_EDGE_BASE_URL   Base URL of the edge functions (overrides the config file)\n\
  PARLEY_ACCESS_TOKEN    Bearer token sent with every request\n\
  PARLEY_LOG             Log filter, e.g. 'parley=debug' (default: warn)"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Send a single prompt and print the reply
    Say {
        /// Prompt text (joined with spaces)
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        prompt: Vec<String>,
        /// Model to use instead of the configured default
        #[arg(short = 'm', long, value_name = "MODEL")]
        model: Option<String>,
        /// Answer through the search endpoint
        #[arg(long, conflicts_with = "stream")]
        search: bool,
        /// Print the reply as it streams in
        #[arg(long)]
        stream: bool,
        /// Append the exchange to this transcript file
        #[arg(long, value_name = "FILE")]
        transcript: Option<PathBuf>,
        /// Room id sent with the request
        #[arg(long, value_name = "ROOM")]
        room: Option<String>,
    },
    /// Print the effective configuration
    Config {
        /// Print only the config file location
        #[arg(long)]
        path: bool,
    },
    /// List the model catalog
    Models {
        /// Save MODEL as the default model
        #[arg(long, value_name = "MODEL")]
        default: Option<String>,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    // A subscriber may already be installed when embedded; keep it.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

pub fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_tracing();
    tokio::runtime::Runtime::new()?.block_on(run(args))
}

async fn run(args: Args) -> Result<(), Box<dyn Error>> {
    match args.command {
        Commands::Say {
            prompt,
            model,
            search,
            stream,
            transcript,
            room,
        } => {
            run_say(
                prompt,
                SayOptions {
                    model,
                    search,
                    stream,
                    transcript,
                    room,
                },
            )
            .await
        }
        Commands::Config { path } => {
            let config_path = Config::get_config_path()?;
            if path {
                println!("{}", path_display(&config_path));
                return Ok(());
            }
            let mut config = Config::load_from_path(&config_path)?;
            config.apply_env_overrides(|key| std::env::var(key).ok());
            println!("Config file: {}", path_display(&config_path));
            config.print_all();
            Ok(())
        }
        Commands::Models { default } => list_models(default),
    }
}
