//! `libcsh` is the implementation of the csh server: session
//! management, the path sandbox, the command registry, and the
//! connection handler that sits on top of `csh-protocol`. This crate
//! root wires a parsed [`Args`] into a running server, the way
//! `runtime.py`/`main.py` wire parsed CLI arguments into a
//! `ServerRuntime`.

use std::fs;
use std::io::{self, Write as _};
use std::path::PathBuf;
use std::sync::Mutex;

use clap::Parser;
use tracing::info;

pub mod command;
pub mod common;
pub mod config;
mod connection;
pub mod consts;
pub mod context;
pub mod daemon;
pub mod error;
pub mod rate_limit;
pub mod sandbox;
pub mod session;
pub mod users;

/// The command-line arguments csh expects, grounded on `main.py`'s
/// `argparse` flag set.
#[derive(Parser, Debug)]
#[clap(author, about, version)]
pub struct Args {
    #[clap(default_value = "config.json", help = "The configuration file for the csh server")]
    pub config: String,

    #[clap(short = 'c', long, help = "Don't use a configuration file")]
    pub noconfig: bool,

    #[clap(short, long, help = "Set the port to host on")]
    pub port: Option<u16>,

    #[clap(short = 'o', long, help = "Set the host name to host on")]
    pub host: Option<String>,

    #[clap(short = 'd', long, help = "Set the path/working directory to use")]
    pub path: Option<String>,

    #[clap(short = 'n', long, help = "Set the name of the server")]
    pub name: Option<String>,

    #[clap(short, long, help = "The users file for the csh server")]
    pub users: Option<String>,

    #[clap(short, long, help = "Set the file the server should log to")]
    pub logfile: Option<String>,

    #[clap(short = 'e', long, help = "Set the logging level")]
    pub level: Option<String>,
}

/// Parse a config file (unless `--noconfig`), bring up logging, load
/// the users file (prompting for a first admin user if it's empty),
/// build the server context, and run the accept loop. This call does
/// not return under normal operation; the server exits via the
/// `shutdown` admin command or a term signal.
pub fn run(args: Args) -> anyhow::Result<()> {
    let config_path = if args.noconfig { None } else { Some(PathBuf::from(&args.config)) };
    let overrides = config::CliOverrides {
        host: args.host,
        port: args.port,
        path: args.path,
        server_name: args.name,
        users_file: args.users,
        file_handler: args.logfile,
        level: args.level,
    };

    let (server_config, settings) = config::load(config_path.as_deref(), &overrides)?;
    init_tracing(&server_config);

    info!(version = consts::VERSION, "starting csh server");

    let users = users::UsersStore::load(&server_config.users_file)?;
    if users.is_empty() {
        prompt_for_admin_user(&users)?;
    }

    let ctx = context::ServerContext::new(server_config, settings, users)?;
    daemon::run(ctx)
}

fn init_tracing(config: &config::ServerConfig) {
    let level = config
        .level
        .as_deref()
        .and_then(|s| s.parse::<tracing::Level>().ok())
        .unwrap_or(if config.verbose { tracing::Level::DEBUG } else { tracing::Level::INFO });

    if let Some(path) = &config.file_handler {
        if let Ok(file) = fs::File::create(path) {
            tracing_subscriber::fmt()
                .with_max_level(level)
                .with_target(false)
                .with_writer(Mutex::new(file))
                .init();
            return;
        }
    }

    tracing_subscriber::fmt().with_max_level(level).with_target(false).init();
}

/// Interactively prompt for a first admin user when the users file is
/// empty, mirroring `main.py::empty_users`.
fn prompt_for_admin_user(users: &users::UsersStore) -> anyhow::Result<()> {
    println!("----------");
    let answer = prompt("NO USERS FOUND IN USERS FILE. WOULD YOU LIKE TO CREATE AN ADMIN USER (y/n)? ")?;
    if !answer.to_lowercase().starts_with('y') {
        println!("----------");
        return Ok(());
    }

    let username = prompt_nonempty("USERNAME: ")?;
    let password = prompt_nonempty("PASSWORD: ")?;
    users.create_user(&username, &password, users::Permission::Admin)?;
    println!("----------");
    Ok(())
}

fn prompt(label: &str) -> anyhow::Result<String> {
    print!("{label}");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn prompt_nonempty(label: &str) -> anyhow::Result<String> {
    loop {
        let line = prompt(label)?;
        if !line.is_empty() {
            return Ok(line);
        }
    }
}
