//! hostlink CLI.
//!
//! Hosts the user-facing `hostfolder`, `services`, `profile` and `config`
//! commands, and the hidden `services sftpd|proxy` entry points the
//! supervisor re-executes this binary with.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use hostlink::guest::{Driver, SshDriver};
use hostlink::hostfolder::{HostFolder, HostFolderKind, Manager, Scope, keys, parse_option_string};
use hostlink::layout::ProfileLayout;
use hostlink::profile::Profiles;
use hostlink::proxy::{self, ProxyConfig};
use hostlink::settings::Settings;
use hostlink::sftpd::{self, SftpdConfig};
use hostlink::supervisor::{DaemonKind, ServiceControl, Supervisor};
use hostlink::validation::{is_valid_port, validate_profile_name, validate_proxy_url};
use hostlink::{HostlinkError, Layout, logging};
use hostlink_shared::constants::ports;

#[derive(Parser)]
#[command(name = "hostlink")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Profile to act on (defaults to the active profile)
    #[arg(long, global = true)]
    profile: Option<String>,

    /// Enable debug output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the background daemons
    #[command(subcommand)]
    Services(ServicesCommands),

    /// Share host directories with the guest
    #[command(subcommand)]
    Hostfolder(HostfolderCommands),

    /// Manage profiles
    #[command(subcommand)]
    Profile(ProfileCommands),

    /// Read and write profile settings
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum ServicesCommands {
    /// Run the SFTP daemon in the foreground
    #[command(hide = true)]
    Sftpd {
        #[arg(long)]
        port: Option<u16>,
    },

    /// Run the HTTP proxy daemon in the foreground
    #[command(hide = true)]
    Proxy(ProxyArgs),

    /// Show each daemon and whether it is running
    List,

    /// Start daemons unless already running
    Start {
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Stop daemons
    Stop {
        #[arg(required = true)]
        names: Vec<String>,
    },
}

#[derive(Args)]
struct ProxyArgs {
    #[arg(long)]
    port: Option<u16>,

    /// Chain every request through this proxy ([scheme://][user:pass@]host[:port])
    #[arg(long)]
    upstream: Option<String>,

    /// Terminate TLS with the built-in CA and re-encrypt towards the origin
    #[arg(long)]
    reencrypt: bool,
}

#[derive(Subcommand)]
enum HostfolderCommands {
    /// Add a host folder definition
    Add(AddArgs),

    /// Remove a host folder definition
    Remove { name: String },

    /// Mount one host folder, or all of them
    Mount {
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        name: Option<String>,

        #[arg(long)]
        all: bool,
    },

    /// Unmount a host folder
    Umount { name: String },

    /// List host folders and their mount state
    List,
}

#[derive(Args)]
struct AddArgs {
    name: String,

    /// cifs or sshfs
    #[arg(long = "type", default_value = "cifs")]
    kind: String,

    /// Options as key=value[,key=value...]
    #[arg(long)]
    options: Option<String>,

    #[arg(long)]
    source: Option<String>,

    #[arg(long)]
    mountpoint: Option<String>,

    #[arg(long)]
    uncpath: Option<String>,

    #[arg(long)]
    username: Option<String>,

    #[arg(long)]
    password: Option<String>,

    #[arg(long)]
    domain: Option<String>,

    #[arg(long)]
    extra_options: Option<String>,

    /// Store the definition for this profile's instance only
    #[arg(long)]
    instance: bool,
}

#[derive(Subcommand)]
enum ProfileCommands {
    Add { name: String },
    Remove { name: String },
    List,
    /// Make a profile the active one
    Set { name: String },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Set a key, e.g. `guest-ip 192.168.42.10`
    Set { key: String, value: String },
    /// Print the profile settings
    View,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(1)
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let layout = Layout::from_env()?;

    let daemon = match &cli.command {
        Commands::Services(ServicesCommands::Sftpd { .. }) => Some(DaemonKind::Sftpd),
        Commands::Services(ServicesCommands::Proxy(_)) => Some(DaemonKind::Proxy),
        _ => None,
    };
    let _log_guard = logging::init(&layout, daemon.map(DaemonKind::name), cli.verbose);

    let profile = resolve_profile(&layout, cli.profile.as_deref())?;

    match cli.command {
        Commands::Services(cmd) => services(&layout, &profile, cmd),
        Commands::Hostfolder(cmd) => hostfolder(&layout, profile, cmd),
        Commands::Profile(cmd) => profiles(&layout, cmd),
        Commands::Config(cmd) => config(&profile, cmd),
    }
}

fn block_on<F: std::future::Future<Output = hostlink::HostlinkResult<()>>>(fut: F) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    runtime.block_on(fut)?;
    Ok(())
}

/// `--profile` when given, otherwise the active profile.
fn resolve_profile(layout: &Layout, requested: Option<&str>) -> Result<ProfileLayout> {
    let name = match requested {
        Some(name) => name.to_string(),
        None => Profiles::new(layout).active()?,
    };
    validate_profile_name(&name)?;
    Ok(layout.profile(&name))
}

fn check_port(port: u16) -> Result<()> {
    if !is_valid_port(u32::from(port)) {
        return Err(HostlinkError::Config(format!(
            "port {} is out of range; use 1024-65535",
            port
        ))
        .into());
    }
    Ok(())
}

fn parse_kinds(names: &[String]) -> Result<Vec<DaemonKind>> {
    Ok(names
        .iter()
        .map(|name| name.parse::<DaemonKind>())
        .collect::<Result<_, _>>()?)
}

fn services(layout: &Layout, profile: &ProfileLayout, cmd: ServicesCommands) -> Result<()> {
    match cmd {
        ServicesCommands::Sftpd { port } => {
            let settings = Settings::load(profile)?;
            let port = settings
                .hostfolders_sftp_port
                .or(port)
                .unwrap_or(ports::SFTPD);
            check_port(port)?;
            block_on(sftpd::run(SftpdConfig::for_profile(profile, port)))
        }
        ServicesCommands::Proxy(args) => {
            let settings = Settings::load(profile)?;
            let port = settings
                .local_proxy_port
                .or(args.port)
                .unwrap_or(ports::PROXY);
            let upstream = settings
                .local_proxy_upstream
                .clone()
                .or(args.upstream)
                .filter(|u| !u.is_empty());
            let reencrypt = settings.local_proxy_reencrypt.unwrap_or(args.reencrypt);

            check_port(port)?;
            if let Some(upstream) = upstream.as_deref() {
                validate_proxy_url(upstream)?;
            }
            block_on(proxy::run(ProxyConfig {
                port,
                upstream,
                reencrypt,
            }))
        }
        ServicesCommands::List => {
            let supervisor = Supervisor::new(layout, profile.name());
            for kind in DaemonKind::ALL {
                match supervisor.get_pid(kind)? {
                    0 => println!("{:<12} Stopped", kind),
                    pid => println!("{:<12} Running (pid {})", kind, pid),
                }
            }
            Ok(())
        }
        ServicesCommands::Start { names } => {
            let supervisor = Supervisor::new(layout, profile.name());
            for kind in parse_kinds(&names)? {
                let pid = supervisor.ensure_running(kind)?;
                println!("{} running (pid {})", kind, pid);
            }
            Ok(())
        }
        ServicesCommands::Stop { names } => {
            let supervisor = Supervisor::new(layout, profile.name());
            for kind in parse_kinds(&names)? {
                supervisor.stop(kind)?;
                println!("{} stopped", kind);
            }
            Ok(())
        }
    }
}

fn folder_from_args(args: &AddArgs) -> Result<HostFolder> {
    let kind: HostFolderKind = args.kind.parse()?;
    let mut folder = HostFolder::new(args.name.clone(), kind);
    if let Some(raw) = args.options.as_deref() {
        folder.options = parse_option_string(raw)?;
    }

    for (key, value) in [
        (keys::SOURCE, &args.source),
        (keys::MOUNTPOINT, &args.mountpoint),
        (keys::UNC_PATH, &args.uncpath),
        (keys::USERNAME, &args.username),
        (keys::PASSWORD, &args.password),
        (keys::DOMAIN, &args.domain),
        (keys::EXTRA_OPTIONS, &args.extra_options),
    ] {
        if let Some(value) = value {
            folder.options.insert(key.to_string(), value.clone());
        }
    }
    Ok(folder)
}

fn hostfolder(layout: &Layout, profile: ProfileLayout, cmd: HostfolderCommands) -> Result<()> {
    let settings = Settings::load(&profile)?;
    let driver = || SshDriver::from_settings(&profile, &settings);
    let manager = Manager::new(
        layout,
        profile.clone(),
        settings.clone(),
        Arc::new(Supervisor::new(layout, profile.name())),
    );

    match cmd {
        HostfolderCommands::Add(args) => {
            let folder = folder_from_args(&args)?;
            let scope = if args.instance { Scope::Instance } else { Scope::Global };
            manager.add(folder, scope)?;
            println!("Added {} host folder {}", scope, args.name);
        }
        HostfolderCommands::Remove { name } => {
            let scope = manager.remove(&name)?;
            println!("Removed {} host folder {}", scope, name);
        }
        HostfolderCommands::Mount { name, all } => {
            let driver = driver()?;
            let result = match name {
                Some(name) if !all => manager.mount(&driver, &name),
                _ => manager.mount_all(&driver),
            };
            match result {
                Err(e) if e.is_already_mounted() => println!("{}", e),
                other => other?,
            }
        }
        HostfolderCommands::Umount { name } => {
            manager.umount(&driver()?, &name)?;
        }
        HostfolderCommands::List => {
            let driver = driver().ok();
            let infos = manager.list(driver.as_ref().map(|d| d as &dyn Driver))?;
            if infos.is_empty() {
                println!("No host folders defined");
                return Ok(());
            }
            println!(
                "{:<16} {:<6} {:<9} {:<32} {:<24} MOUNTED",
                "NAME", "TYPE", "SCOPE", "SOURCE", "MOUNTPOINT"
            );
            for info in infos {
                let mounted = match info.mounted {
                    Some(true) => "Y",
                    Some(false) => "N",
                    None => "-",
                };
                println!(
                    "{:<16} {:<6} {:<9} {:<32} {:<24} {}",
                    info.name,
                    info.kind.to_string(),
                    info.scope.to_string(),
                    info.source,
                    info.mountpoint,
                    mounted
                );
            }
        }
    }
    Ok(())
}

fn profiles(layout: &Layout, cmd: ProfileCommands) -> Result<()> {
    let profiles = Profiles::new(layout);
    match cmd {
        ProfileCommands::Add { name } => {
            profiles.add(&name)?;
            println!("Profile {} created", name);
        }
        ProfileCommands::Remove { name } => {
            profiles.remove(&name)?;
            println!("Profile {} removed", name);
        }
        ProfileCommands::List => {
            let active = profiles.active()?;
            for name in profiles.list()? {
                let marker = if name == active { "*" } else { " " };
                println!("{} {}", marker, name);
            }
        }
        ProfileCommands::Set { name } => {
            profiles.set_active(&name)?;
            println!("Active profile is now {}", name);
        }
    }
    Ok(())
}

fn config(profile: &ProfileLayout, cmd: ConfigCommands) -> Result<()> {
    let store = Settings::store(profile);
    match cmd {
        ConfigCommands::Set { key, value } => {
            store.update(|settings| settings.set(&key, &value))?;
        }
        ConfigCommands::View => {
            let settings = store.load()?;
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
    }
    Ok(())
}
