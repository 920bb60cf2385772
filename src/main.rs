mod client;
mod commands;
mod config;
mod tls;

use crate::client::{KeyId, OutlineClient};
use crate::commands::{OutputFormat, parse_megabytes};
use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use std::io;
use std::path::PathBuf;

const EXAMPLES: &str = "Examples:
  outline-keys list
  outline-keys add --name laptop
  outline-keys add laptop
  outline-keys show 1
  outline-keys rename 1 \"Work iPhone\"
  outline-keys limit 1 1024
  outline-keys limit 1 0";

#[derive(Parser)]
#[command(
    name = "outline-keys",
    version,
    about = "Manage Outline VPN access keys",
    after_help = EXAMPLES
)]
struct Cli {
    #[arg(
        long,
        global = true,
        value_name = "FILE",
        env = "OUTLINE_CONFIG",
        help = "Configuration file (defaults to ~/.outline/config.env)"
    )]
    config: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        value_name = "URL",
        env = "OUTLINE_API_URL",
        hide_env_values = true,
        help = "Management API URL override for this invocation"
    )]
    api_url: Option<String>,

    #[arg(
        long,
        global = true,
        value_name = "SHA256",
        env = "OUTLINE_CERT_SHA256",
        hide_env_values = true,
        help = "Certificate fingerprint override for this invocation"
    )]
    cert_sha256: Option<String>,

    #[arg(
        long,
        short = 'o',
        value_enum,
        default_value_t = OutputFormat::Pretty,
        global = true,
        help = "Output format for list/show/add"
    )]
    output: OutputFormat,

    #[arg(
        long,
        short = 'v',
        action = ArgAction::Count,
        global = true,
        help = "Increase log verbosity (-v info, -vv debug)"
    )]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List all access keys
    List,
    /// Show full key details
    Show {
        #[arg(value_name = "KEY_ID")]
        key_id: String,
    },
    /// Create a new access key
    Add {
        #[arg(value_name = "NAME", help = "Name for the new key (positional)")]
        name: Option<String>,
        #[arg(
            long = "name",
            short = 'n',
            value_name = "NAME",
            conflicts_with = "name",
            help = "Name for the new key (flag)"
        )]
        name_flag: Option<String>,
    },
    /// Delete an access key
    Delete {
        #[arg(value_name = "KEY_ID")]
        key_id: String,
    },
    /// Rename an access key
    Rename {
        #[arg(value_name = "KEY_ID")]
        key_id: String,
        #[arg(value_name = "NEW_NAME")]
        new_name: String,
    },
    /// Set data limit in MB (0 to remove)
    Limit {
        #[arg(value_name = "KEY_ID")]
        key_id: String,
        #[arg(value_name = "MB", value_parser = parse_megabytes)]
        megabytes: f64,
    },
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let path = match cli.config {
        Some(path) => path,
        None => config::default_path()?,
    };
    let settings = config::resolve(
        &path,
        cli.api_url,
        cli.cert_sha256,
        config::prompt_terminal,
    )?;
    let client = OutlineClient::new(&settings.api_url, &settings.cert_sha256)?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    match cli.command {
        Commands::List => commands::list(&client, cli.output, &mut out),
        Commands::Show { key_id } => {
            commands::show(&client, &KeyId::from(key_id), cli.output, &mut out)
        }
        Commands::Add { name, name_flag } => {
            commands::add(&client, name.or(name_flag).as_deref(), cli.output, &mut out)
        }
        Commands::Delete { key_id } => commands::delete(&client, &KeyId::from(key_id), &mut out),
        Commands::Rename { key_id, new_name } => {
            commands::rename(&client, &KeyId::from(key_id), &new_name, &mut out)
        }
        Commands::Limit { key_id, megabytes } => {
            commands::limit(&client, &KeyId::from(key_id), megabytes, &mut out)
        }
    }
}
