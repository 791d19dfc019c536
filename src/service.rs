//! Higher-level contract consumed by the UI collaborator: validation,
//! ping, launch-session hand-off, and CRUD pass-through to
//! [`HostRepository`].

use std::net::ToSocketAddrs;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use crate::cancel::{Context, SleepOutcome};
use crate::error::SshmError;
use crate::host::{Host, HostRepository};
use crate::validation;

const PING_DIAL_TIMEOUT: Duration = Duration::from_secs(3);

/// External collaborator that, given an alias, returns the shell
/// client's own resolution of `(hostname, port)`. Must fall back cleanly
/// on error — `ping` falls back to the stored `hostname`/`port` itself,
/// so implementations need only surface an error rather than guess.
#[async_trait]
pub trait DestinationResolver: Send + Sync {
	async fn resolve(&self, alias: &str) -> Result<(String, u32), SshmError>;
}

/// A resolver that never succeeds, forcing `ping` to always fall back to
/// the host's own stored `hostname`/`port`. Useful where no shell-client
/// resolution subprocess is wired up.
pub struct NoopResolver;

#[async_trait]
impl DestinationResolver for NoopResolver {
	async fn resolve(&self, alias: &str) -> Result<(String, u32), SshmError> {
		Err(SshmError::Upstream {
			op: "resolve".into(),
			status: None,
			message: format!("no destination resolver configured for {alias:?}"),
		})
	}
}

/// External collaborator that receives a validated alias and runs the
/// shell-client binary attached to the caller's standard streams. The
/// core never passes unvalidated input to this trait.
#[async_trait]
pub trait SessionLauncher: Send + Sync {
	async fn launch(&self, alias: &str) -> Result<(), SshmError>;
}

pub struct HostService {
	repo: Arc<HostRepository>,
	resolver: Arc<dyn DestinationResolver>,
	launcher: Arc<dyn SessionLauncher>,
}

/// Outcome of a `ping` call: whether the dial succeeded, how long it
/// took, and an error message on failure.
#[derive(Debug, Clone)]
pub struct PingResult {
	pub reachable: bool,
	pub elapsed: Duration,
	pub error: Option<String>,
}

impl HostService {
	pub fn new(
		repo: Arc<HostRepository>,
		resolver: Arc<dyn DestinationResolver>,
		launcher: Arc<dyn SessionLauncher>,
	) -> Self {
		HostService { repo, resolver, launcher }
	}

	pub fn list(&self, query: &str) -> Result<Vec<Host>, SshmError> {
		self.repo.list(query)
	}

	pub fn add(&self, host: Host) -> Result<Host, SshmError> {
		self.repo.add(host)
	}

	pub fn update(&self, old_alias: &str, new: Host) -> Result<Host, SshmError> {
		self.repo.update(old_alias, new)
	}

	pub fn delete(&self, alias: &str) -> Result<(), SshmError> {
		self.repo.delete(alias)
	}

	pub fn set_pinned(&self, alias: &str, pinned: bool) -> Result<(), SshmError> {
		self.repo.set_pinned(alias, pinned)
	}

	/// Resolves the destination via the shell-client's own resolution,
	/// falling back to the stored `hostname`/`port` on resolver error,
	/// then dials a TCP connection bounded by whichever is shorter: the
	/// 3-second dial timeout or `ctx`'s own deadline. `ctx` cancellation
	/// aborts the dial in flight.
	#[instrument(skip(self, ctx), fields(op = "ping", alias))]
	pub async fn ping(&self, alias: &str, ctx: &mut Context) -> Result<PingResult, SshmError> {
		ctx.check("ping")?;

		let host = self.repo.get(alias)?.ok_or_else(|| SshmError::NotFound {
			op: "ping".into(),
			alias: alias.to_string(),
		})?;

		let (hostname, port) = match self.resolver.resolve(alias).await {
			Ok(resolved) => resolved,
			Err(e) => {
				warn!(alias, error = %e, "destination resolver failed, falling back to stored host");
				(host.hostname.clone(), if host.port == 0 { 22 } else { host.port })
			}
		};

		ctx.check("ping")?;
		let start = Instant::now();
		let outcome = tokio::select! {
			res = dial_tcp(hostname, port) => DialOutcome::Dialed(res),
			sleep = ctx.sleep_or_cancel(PING_DIAL_TIMEOUT) => DialOutcome::Bounded(sleep),
		};
		let elapsed = start.elapsed();

		match outcome {
			DialOutcome::Dialed(Ok(())) => Ok(PingResult { reachable: true, elapsed, error: None }),
			DialOutcome::Dialed(Err(e)) => Ok(PingResult { reachable: false, elapsed, error: Some(e.to_string()) }),
			DialOutcome::Bounded(SleepOutcome::Canceled) => Err(SshmError::Canceled { op: "ping".into() }),
			DialOutcome::Bounded(SleepOutcome::Expired) => Err(SshmError::Timeout { op: "ping".into() }),
			DialOutcome::Bounded(SleepOutcome::Elapsed) => Ok(PingResult {
				reachable: false,
				elapsed,
				error: Some("dial timed out after 3s".to_string()),
			}),
		}
	}

	/// Runs the alias safety rule, then a subprocess hand-off. On
	/// successful exit, `use_count`/`last_seen` are updated. This update is
	/// not transactional with the subprocess exit — a crash between exit
	/// and the metadata write loses one increment.
	#[instrument(skip(self, ctx), fields(op = "launch_session", alias))]
	pub async fn launch_session(&self, alias: &str, ctx: &mut Context) -> Result<(), SshmError> {
		validation::validate_alias_for_launch(alias).map_err(|e| SshmError::Security {
			op: "launch_session".into(),
			alias: alias.to_string(),
			reason: e.0,
		})?;

		let known = self.repo.get(alias)?;
		if known.is_none() {
			return Err(SshmError::Security {
				op: "launch_session".into(),
				alias: alias.to_string(),
				reason: "alias is not present in the repository".into(),
			});
		}

		ctx.check("launch_session")?;
		self.launcher.launch(alias).await?;

		if let Err(e) = self.repo.record_session(alias) {
			warn!(alias, error = %e, "session launched but use_count/last_seen update failed");
		} else {
			info!(alias, "session recorded");
		}
		Ok(())
	}
}

enum DialOutcome {
	Dialed(Result<(), SshmError>),
	Bounded(SleepOutcome),
}

async fn dial_tcp(hostname: String, port: u32) -> Result<(), SshmError> {
	let addr = format!("{hostname}:{port}");
	let addrs = tokio::task::spawn_blocking(move || addr.to_socket_addrs())
		.await
		.map_err(|e| SshmError::io("ping", None, std::io::Error::other(e.to_string())))?
		.map_err(|e| SshmError::io("ping", None, e))?;
	let target = addrs
		.into_iter()
		.next()
		.ok_or_else(|| SshmError::io("ping", None, std::io::Error::other("no addresses resolved")))?;
	tokio::net::TcpStream::connect(target).await.map(|_| ()).map_err(|e| SshmError::io("ping", None, e))
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use tempfile::TempDir;

	struct RecordingLauncher {
		calls: AtomicUsize,
	}

	#[async_trait]
	impl SessionLauncher for RecordingLauncher {
		async fn launch(&self, _alias: &str) -> Result<(), SshmError> {
			self.calls.fetch_add(1, Ordering::SeqCst);
			Ok(())
		}
	}

	fn service(dir: &TempDir) -> (HostService, Arc<RecordingLauncher>) {
		let repo = Arc::new(HostRepository::new(
			dir.path().join("config"),
			dir.path().join("metadata.json"),
		));
		let launcher = Arc::new(RecordingLauncher { calls: AtomicUsize::new(0) });
		let svc = HostService::new(repo, Arc::new(NoopResolver), launcher.clone());
		(svc, launcher)
	}

	fn sample(alias: &str) -> Host {
		Host {
			alias: alias.to_string(),
			hostname: "127.0.0.1".to_string(),
			user: None,
			port: 22,
			identity_files: vec![],
			tags: vec![],
			pinned_at: None,
			last_seen: None,
			use_count: 0,
			extra_directives: vec![],
		}
	}

	#[tokio::test]
	async fn launch_session_rejects_command_injection_without_spawning() {
		let dir = TempDir::new().unwrap();
		let (svc, launcher) = service(&dir);
		let mut ctx = Context::background();
		let err = svc.launch_session("srv;rm -rf /", &mut ctx).await.unwrap_err();
		assert!(matches!(err, SshmError::Security { .. }));
		assert_eq!(launcher.calls.load(Ordering::SeqCst), 0);
	}

	#[tokio::test]
	async fn launch_session_rejects_unknown_alias() {
		let dir = TempDir::new().unwrap();
		let (svc, launcher) = service(&dir);
		let mut ctx = Context::background();
		let err = svc.launch_session("unknown-host", &mut ctx).await.unwrap_err();
		assert!(matches!(err, SshmError::Security { .. }));
		assert_eq!(launcher.calls.load(Ordering::SeqCst), 0);
	}

	#[tokio::test]
	async fn launch_session_updates_use_count_on_success() {
		let dir = TempDir::new().unwrap();
		let (svc, launcher) = service(&dir);
		svc.add(sample("prod-01")).unwrap();

		let mut ctx = Context::background();
		svc.launch_session("prod-01", &mut ctx).await.unwrap();
		assert_eq!(launcher.calls.load(Ordering::SeqCst), 1);

		let host = svc.list("").unwrap().into_iter().next().unwrap();
		assert_eq!(host.use_count, 1);
		assert!(host.last_seen.is_some());
	}

	#[tokio::test]
	async fn ping_unreachable_host_returns_error_not_panic() {
		let dir = TempDir::new().unwrap();
		let (svc, _launcher) = service(&dir);
		let mut h = sample("dead");
		h.hostname = "203.0.113.1".to_string(); // TEST-NET-3, never routable
		h.port = 9;
		svc.add(h).unwrap();

		let mut ctx = Context::background();
		let result = svc.ping("dead", &mut ctx).await.unwrap();
		assert!(!result.reachable);
		assert!(result.error.is_some());
	}

	#[tokio::test]
	async fn ping_missing_alias_is_not_found() {
		let dir = TempDir::new().unwrap();
		let (svc, _launcher) = service(&dir);
		let mut ctx = Context::background();
		let err = svc.ping("nope", &mut ctx).await.unwrap_err();
		assert!(matches!(err, SshmError::NotFound { .. }));
	}

	#[tokio::test]
	async fn ping_respects_cancellation() {
		let dir = TempDir::new().unwrap();
		let (svc, _launcher) = service(&dir);
		let mut h = sample("dead");
		h.hostname = "203.0.113.1".to_string();
		h.port = 9;
		svc.add(h).unwrap();

		let (mut ctx, handle) = Context::cancelable();
		handle.cancel();
		let err = svc.ping("dead", &mut ctx).await.unwrap_err();
		assert!(matches!(err, SshmError::Canceled { .. }));
	}
}

// vim: ts=4
