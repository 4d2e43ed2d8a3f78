mod commands;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::copy::CopyArgs;
use ferry_core::install_signal_handler;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "ferry",
    version,
    about = "Copy and live-migrate containers between endpoints"
)]
struct Cli {
    /// Path to the client configuration file.
    #[arg(long, env = "FERRY_CONFIG", global = true)]
    config_file: Option<PathBuf>,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Copy a container or snapshot, within a remote or to another one.
    Copy {
        /// Source as [remote:]container[/snapshot].
        source: String,
        /// Destination as [remote:][name]. Without it the endpoint picks a name.
        destination: Option<String>,
        /// Profile to apply on top of the source's profiles (repeatable).
        #[arg(short, long = "profile")]
        profiles: Vec<String>,
        /// Config override as key=value (repeatable, last one wins).
        #[arg(short, long = "config", value_name = "KEY=VALUE")]
        config: Vec<String>,
        /// Make the copy ephemeral.
        #[arg(short, long, default_value_t = false)]
        ephemeral: bool,
        /// Copy the container without its snapshots.
        #[arg(long, default_value_t = false)]
        container_only: bool,
    },
    /// Move a container: rename it within a remote, or migrate it to another one.
    Move {
        /// Source as [remote:]container.
        source: String,
        /// Destination as [remote:][name].
        destination: String,
    },
    /// Manage the remotes known to this client.
    Remote {
        #[command(subcommand)]
        command: RemoteCommands,
    },
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
    /// Generate man pages in the specified directory.
    ManPages {
        /// Output directory for man pages.
        #[arg(default_value = "man")]
        dir: PathBuf,
    },
}

#[derive(Debug, Subcommand)]
enum RemoteCommands {
    /// Register a new remote.
    Add {
        name: String,
        /// Base URL, e.g. https://10.0.0.1:8443.
        url: String,
        /// Bearer token sent with every request.
        #[arg(long)]
        token: Option<String>,
        /// PEM certificate identifying the remote.
        #[arg(long)]
        certificate: Option<PathBuf>,
    },
    /// List known remotes.
    List,
    /// Forget a remote.
    Remove { name: String },
    /// Make a remote the default for unqualified names.
    SetDefault { name: String },
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("FERRY_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    install_signal_handler();

    let result = dispatch(cli.command, cli.config_file.as_deref(), cli.json);

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            ExitCode::from(commands::exit_code_for(&msg))
        }
    }
}

fn dispatch(command: Commands, config_file: Option<&Path>, json: bool) -> Result<u8, String> {
    tracing::debug!("dispatching {command:?}");
    let config_path = || commands::config_path(config_file);
    match command {
        Commands::Copy {
            source,
            destination,
            profiles,
            config,
            ephemeral,
            container_only,
        } => commands::copy::run(
            commands::load_config(&config_path()?)?,
            &CopyArgs {
                source: &source,
                destination: destination.as_deref(),
                profiles: &profiles,
                config: &config,
                ephemeral,
                container_only,
            },
            json,
        ),
        Commands::Move {
            source,
            destination,
        } => commands::relocate::run(
            commands::load_config(&config_path()?)?,
            &source,
            &destination,
            json,
        ),
        Commands::Remote { command } => match command {
            RemoteCommands::Add {
                name,
                url,
                token,
                certificate,
            } => commands::remote::add(
                &config_path()?,
                &name,
                &url,
                token.as_deref(),
                certificate.as_deref(),
            ),
            RemoteCommands::List => commands::remote::list(&config_path()?, json),
            RemoteCommands::Remove { name } => commands::remote::remove(&config_path()?, &name),
            RemoteCommands::SetDefault { name } => {
                commands::remote::set_default(&config_path()?, &name)
            }
        },
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
        Commands::ManPages { dir } => commands::man_pages::run::<Cli>(&dir),
    }
}
