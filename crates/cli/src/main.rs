mod cmd;
mod logging;
mod ui;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "bsl", version, about = "Library records with sandboxed operator scripts")]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Member to act as; a guest session when omitted
    #[arg(long, short, global = true)]
    user: Option<String>,

    /// Password for --user; prompted for when missing
    #[arg(long, global = true, env = "BSL_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create the database, the default library and the first member
    Init(InitArgs),

    /// Validate configuration and print resolved settings
    Doctor,

    /// Manage members
    #[command(subcommand)]
    Member(MemberCommand),

    /// Manage Lua scripts
    #[command(subcommand)]
    Script(ScriptCommand),

    /// Run a script on demand
    Run(RunArgs),

    /// Run startup scripts, then repeating scripts as they fall due
    Scheduler(SchedulerArgs),

    /// Interactive Lua session as the current user
    Lua,
}

#[derive(Debug, Args)]
pub struct InitArgs {
    /// Name of the first member
    #[arg(long, default_value = "admin")]
    pub admin: String,
}

#[derive(Debug, Subcommand)]
enum MemberCommand {
    /// Add a member
    Add(MemberAddArgs),
}

#[derive(Debug, Args)]
pub struct MemberAddArgs {
    pub name: String,

    #[arg(long)]
    pub level: u8,

    /// Password of the new member; prompted for when missing
    #[arg(long, env = "BSL_NEW_PASSWORD", hide_env_values = true)]
    pub new_password: Option<String>,
}

#[derive(Debug, Subcommand)]
enum ScriptCommand {
    /// Store a Lua file as a script
    Add(ScriptAddArgs),

    /// List stored scripts
    List,

    /// Print a script's persistent storage
    Storage {
        name: String,
    },
}

#[derive(Debug, Args)]
pub struct ScriptAddArgs {
    pub name: String,

    /// Lua source file
    pub file: PathBuf,

    /// Capability to grant (AUTH_GRANTED, REQUESTS, STORE); repeatable
    #[arg(long = "permission")]
    pub permissions: Vec<String>,

    /// Run at this level instead of the invoker's
    #[arg(long)]
    pub setlevel: Option<u8>,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Script name; chosen interactively when omitted
    pub script: Option<String>,

    /// Global function to call after the script body
    #[arg(long)]
    pub function: Option<String>,
}

#[derive(Debug, Args)]
pub struct SchedulerArgs {
    /// Run startup and due scripts once, then exit
    #[arg(long)]
    pub once: bool,
}

/// Global options every command needs.
#[derive(Debug, Clone)]
pub struct Session {
    pub config: Option<PathBuf>,
    pub user: Option<String>,
    pub password: Option<String>,
}

fn main() {
    let cli = Cli::parse();
    let session = Session { config: cli.config, user: cli.user, password: cli.password };

    match cli.command {
        Commands::Init(args) => cmd::init::run(&session, &args),
        Commands::Doctor => cmd::doctor::run(session.config.as_deref()),
        Commands::Member(MemberCommand::Add(args)) => cmd::member::add(&session, args),
        Commands::Script(ScriptCommand::Add(args)) => cmd::script::add(&session, args),
        Commands::Script(ScriptCommand::List) => cmd::script::list(&session),
        Commands::Script(ScriptCommand::Storage { name }) => cmd::script::storage(&session, &name),
        Commands::Run(args) => cmd::run::run(&session, args),
        Commands::Scheduler(args) => cmd::scheduler::run(&session, &args),
        Commands::Lua => cmd::lua::run(&session),
    }
}
