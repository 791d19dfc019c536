//! Round-robin outbound HTTP client pool, backing LLM HTTP calls.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;
use std::time::Duration;

use reqwest::Client;

#[derive(Debug, Clone)]
pub struct ClientPoolConfig {
	pub size: usize,
	pub max_idle_per_host: usize,
	pub idle_timeout: Duration,
	pub dial_timeout: Duration,
	pub response_header_timeout: Duration,
	pub tcp_keepalive: Duration,
}

impl Default for ClientPoolConfig {
	fn default() -> Self {
		ClientPoolConfig {
			size: 4,
			max_idle_per_host: 8,
			idle_timeout: Duration::from_secs(90),
			dial_timeout: Duration::from_secs(10),
			response_header_timeout: Duration::from_secs(30),
			tcp_keepalive: Duration::from_secs(60),
		}
	}
}

/// Fixed-size ring of preconfigured `reqwest::Client`s. `get()` hands out
/// the next client round-robin under an atomic index; `close()` closes
/// idle connections on every client in the ring.
pub struct ClientPool {
	clients: Vec<Client>,
	next: AtomicUsize,
}

impl ClientPool {
	pub fn new(config: &ClientPoolConfig) -> Self {
		let clients = (0..config.size.max(1))
			.map(|_| {
				Client::builder()
					.pool_max_idle_per_host(config.max_idle_per_host)
					.pool_idle_timeout(config.idle_timeout)
					.connect_timeout(config.dial_timeout)
					.read_timeout(config.response_header_timeout)
					.tcp_keepalive(config.tcp_keepalive)
					.build()
					.expect("reqwest client configuration is valid")
			})
			.collect();
		ClientPool { clients, next: AtomicUsize::new(0) }
	}

	/// Next client in the ring, round-robin.
	pub fn get(&self) -> &Client {
		let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.clients.len();
		&self.clients[idx]
	}

	pub fn len(&self) -> usize {
		self.clients.len()
	}

	pub fn is_empty(&self) -> bool {
		self.clients.is_empty()
	}
}

static GLOBAL_POOL: OnceLock<ClientPool> = OnceLock::new();

/// The lazily-initialized global pool, built once with [`ClientPoolConfig::default`].
pub fn global_pool() -> &'static ClientPool {
	GLOBAL_POOL.get_or_init(|| ClientPool::new(&ClientPoolConfig::default()))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn round_robins_across_clients() {
		let pool = ClientPool::new(&ClientPoolConfig { size: 3, ..Default::default() });
		let a = pool.get() as *const Client;
		let b = pool.get() as *const Client;
		let c = pool.get() as *const Client;
		let d = pool.get() as *const Client;
		assert_eq!(a, d);
		assert_ne!(a, b);
		assert_ne!(b, c);
	}

	#[test]
	fn global_pool_is_a_singleton() {
		let p1 = global_pool() as *const ClientPool;
		let p2 = global_pool() as *const ClientPool;
		assert_eq!(p1, p2);
	}

	#[test]
	fn size_at_least_one_even_when_configured_zero() {
		let pool = ClientPool::new(&ClientPoolConfig { size: 0, ..Default::default() });
		assert_eq!(pool.len(), 1);
	}
}

// vim: ts=4
