use std::{path::PathBuf, sync::Arc};

use clap::{Parser, Subcommand};
use color_eyre::eyre;
use tokio::net::TcpListener;

use rsshd_server::{keygen, server, Options};

/// An SSH server serving files over `sftp` and `scp` from a confined root.
#[derive(Debug, Parser)]
#[command(version, args_conflicts_with_subcommands = true)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    options: Options,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate a host key and exit.
    Keygen {
        /// The type of key to generate.
        #[arg(long, value_enum, default_value = "ed25519")]
        algorithm: keygen::KeyType,

        /// The file to write the private key to, the public key going to the same path with `.pub`.
        #[arg(long)]
        output: PathBuf,

        /// The comment of the key.
        #[arg(long, default_value = "")]
        comment: String,
    },
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let args = Args::parse();

    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init()
        .ok();

    if let Some(Command::Keygen {
        algorithm,
        output,
        comment,
    }) = args.command
    {
        let key = keygen::generate(algorithm, &comment)?;
        keygen::write(&key, &output)?;

        return Ok(());
    }

    let listen = args.options.listen;
    let config = match args.options.load().await {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Error starting server: {err}");

            std::process::exit(1);
        }
    };

    let listener = TcpListener::bind(listen).await?;
    server::listen(Arc::new(config), listener).await?;

    Ok(())
}
