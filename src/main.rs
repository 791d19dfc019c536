use std::process::ExitCode;
use std::sync::Arc;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tracing::{error, instrument};
use uuid::Uuid;

use sshm::cancel::Context;
use sshm::config::Config;
use sshm::error::SshmError;
use sshm::host::{Host, HostRepository};
use sshm::logging;
use sshm::service::{DestinationResolver, HostService, SessionLauncher};

/// Manage a collection of SSH host entries backed by `~/.ssh/config` and a
/// sidecar metadata file.
#[derive(Parser)]
#[command(name = "sshm", version, about)]
struct Cli {
	/// Path to a TOML config file overriding the conventional location.
	#[arg(long)]
	config: Option<std::path::PathBuf>,

	/// Override the shell-client config file path.
	#[arg(long)]
	ssh_config: Option<std::path::PathBuf>,

	/// Override the sidecar metadata file path.
	#[arg(long)]
	metadata: Option<std::path::PathBuf>,

	#[command(subcommand)]
	command: Commands,
}

#[derive(Subcommand)]
enum Commands {
	/// List hosts, optionally filtered by a case-insensitive substring.
	List {
		#[arg(default_value = "")]
		query: String,
	},
	/// Add a new host.
	Add {
		alias: String,
		hostname: String,
		#[arg(long)]
		user: Option<String>,
		#[arg(long, default_value_t = 0)]
		port: u32,
		#[arg(long = "identity-file")]
		identity_files: Vec<String>,
		#[arg(long)]
		tag: Vec<String>,
	},
	/// Remove a host.
	Rm { alias: String },
	/// Pin a host so it sorts to the top of `list`.
	Pin { alias: String },
	/// Unpin a host.
	Unpin { alias: String },
	/// Check TCP reachability of a host.
	Ping { alias: String },
	/// Launch an interactive session via the shell-client binary.
	Connect { alias: String },
}

fn main() -> ExitCode {
	let cli = Cli::parse();
	let config_path = cli.config.clone().unwrap_or_else(sshm::config::default_config_file_path);
	let mut config = Config::load(Some(&config_path));
	if let Some(p) = &cli.ssh_config {
		config.ssh_config_path = p.clone();
	}
	if let Some(p) = &cli.metadata {
		config.metadata_path = p.clone();
	}

	logging::init_tracing(&config.log_level);

	let runtime = match tokio::runtime::Runtime::new() {
		Ok(rt) => rt,
		Err(e) => {
			eprintln!("failed to start async runtime: {e}");
			return ExitCode::FAILURE;
		}
	};

	match runtime.block_on(run(config, cli.command)) {
		Ok(()) => ExitCode::SUCCESS,
		Err(e) => {
			error!(error = %e, "command failed");
			eprintln!("sshm: {e}");
			ExitCode::FAILURE
		}
	}
}

#[instrument(skip(config, command), fields(trace_id = %Uuid::new_v4()))]
async fn run(config: Config, command: Commands) -> Result<(), SshmError> {
	let repo = Arc::new(HostRepository::new(config.ssh_config_path.clone(), config.metadata_path.clone()));
	let resolver: Arc<dyn DestinationResolver> = Arc::new(SshConfigResolver);
	let launcher: Arc<dyn SessionLauncher> = Arc::new(ShellSessionLauncher);
	let service = HostService::new(repo, resolver, launcher);

	match command {
		Commands::List { query } => {
			for host in service.list(&query)? {
				print_host(&host);
			}
		}
		Commands::Add { alias, hostname, user, port, identity_files, tag } => {
			let host = Host {
				alias,
				hostname,
				user,
				port,
				identity_files,
				tags: tag,
				pinned_at: None,
				last_seen: None,
				use_count: 0,
				extra_directives: vec![],
			};
			let added = service.add(host)?;
			println!("added {}", added.alias);
		}
		Commands::Rm { alias } => {
			service.delete(&alias)?;
			println!("removed {alias}");
		}
		Commands::Pin { alias } => {
			service.set_pinned(&alias, true)?;
			println!("pinned {alias}");
		}
		Commands::Unpin { alias } => {
			service.set_pinned(&alias, false)?;
			println!("unpinned {alias}");
		}
		Commands::Ping { alias } => {
			let mut ctx = Context::with_timeout(std::time::Duration::from_secs(10));
			let result = service.ping(&alias, &mut ctx).await?;
			if result.reachable {
				println!("{alias} reachable in {:?}", result.elapsed);
			} else {
				println!("{alias} unreachable: {}", result.error.unwrap_or_default());
			}
		}
		Commands::Connect { alias } => {
			let mut ctx = Context::with_timeout(std::time::Duration::from_secs(3600));
			service.launch_session(&alias, &mut ctx).await?;
		}
	}
	Ok(())
}

fn print_host(host: &Host) {
	let pin_marker = if host.pinned_at.is_some() { "*" } else { " " };
	let user_at = host.user.as_deref().map(|u| format!("{u}@")).unwrap_or_default();
	println!(
		"{pin_marker} {:<24} {user_at}{}{} (uses: {})",
		host.alias,
		host.hostname,
		if host.port != 0 { format!(":{}", host.port) } else { String::new() },
		host.use_count
	);
}

/// Shells out to `ssh -G <alias>` to resolve the shell-client's own view
/// of `hostname`/`port`, parsing its `keyword value` output lines.
struct SshConfigResolver;

#[async_trait]
impl DestinationResolver for SshConfigResolver {
	async fn resolve(&self, alias: &str) -> Result<(String, u32), SshmError> {
		let output = tokio::process::Command::new("ssh")
			.arg("-G")
			.arg(alias)
			.output()
			.await
			.map_err(|e| SshmError::io("resolve", None, e))?;
		if !output.status.success() {
			return Err(SshmError::Upstream {
				op: "resolve".into(),
				status: output.status.code().map(|c| c as u16),
				message: "ssh -G exited non-zero".into(),
			});
		}
		let text = String::from_utf8_lossy(&output.stdout);
		let mut hostname = None;
		let mut port = None;
		for line in text.lines() {
			if let Some(v) = line.strip_prefix("hostname ") {
				hostname = Some(v.trim().to_string());
			} else if let Some(v) = line.strip_prefix("port ") {
				port = v.trim().parse().ok();
			}
		}
		match (hostname, port) {
			(Some(h), Some(p)) => Ok((h, p)),
			_ => Err(SshmError::Upstream {
				op: "resolve".into(),
				status: None,
				message: "ssh -G output missing hostname/port".into(),
			}),
		}
	}
}

/// Hands the validated alias to the `ssh` binary, inheriting stdio so the
/// interactive session behaves like a normal terminal invocation.
struct ShellSessionLauncher;

#[async_trait]
impl SessionLauncher for ShellSessionLauncher {
	async fn launch(&self, alias: &str) -> Result<(), SshmError> {
		let status = tokio::process::Command::new("ssh")
			.arg(alias)
			.status()
			.await
			.map_err(|e| SshmError::io("launch_session", None, e))?;
		if !status.success() {
			return Err(SshmError::Upstream {
				op: "launch_session".into(),
				status: status.code().map(|c| c as u16),
				message: "ssh exited non-zero".into(),
			});
		}
		Ok(())
	}
}

// vim: ts=4
