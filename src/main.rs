use clap::{Parser, Subcommand};
use std::path::PathBuf;

use usrctl::commands;
use usrctl::ui;
use usrctl::{AccountStore, Settings};

/// usrctl main parser
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the settings file (default: /etc/usrctl.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Operate on account files under this directory instead of /
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Activate debug mode
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// User account management commands
    User {
        #[command(subcommand)]
        command: commands::user::UserCommand,
    },

    /// Group management commands
    Group {
        #[command(subcommand)]
        command: commands::group::GroupCommand,
    },
}

fn main() {
    let cli = Cli::parse();
    ui::set_debug_mode(cli.debug);

    if let Err(err) = run(&cli) {
        ui::error(&format!("{err:#}"));
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(root) = &cli.root {
        settings.reroot(root);
        ui::debug(&format!("operating on account files under {}", root.display()));
    }
    let rerooted = cli.root.is_some();
    let store = AccountStore::new(settings)?;

    match &cli.command {
        Commands::User { command } => commands::user::handle(command, &store, rerooted),
        Commands::Group { command } => commands::group::handle(command, &store, rerooted),
    }
}
