use std::{sync::Arc, time::Duration};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use kb_service::KbService;
use kb_storage::db::Db;

#[derive(Clone)]
pub struct AppState {
	pub service: Arc<KbService>,
}
impl AppState {
	pub async fn new(config: kb_config::Config) -> color_eyre::Result<Self> {
		let db = Db::connect(&config.storage.postgres).await?;

		db.ensure_schema(config.providers.embedding.dimensions).await?;

		Ok(Self::from_service(KbService::new(config, db)))
	}

	pub fn from_service(service: KbService) -> Self {
		Self { service: Arc::new(service) }
	}

	pub fn request_timeout(&self) -> Duration {
		Duration::from_millis(self.service.cfg.retrieval.request_timeout_ms)
	}
}

/// Cancellation scope of one request.
///
/// The token fires when the deadline passes or when the scope is dropped, which is what happens
/// to a handler future whose client disconnected.
pub struct RequestScope {
	cancel: CancellationToken,
	timer: JoinHandle<()>,
}
impl RequestScope {
	pub fn new(timeout: Duration) -> Self {
		let cancel = CancellationToken::new();
		let deadline = cancel.clone();
		let timer = tokio::spawn(async move {
			tokio::time::sleep(timeout).await;

			tracing::warn!(timeout_ms = timeout.as_millis() as u64, "Request deadline reached.");

			deadline.cancel();
		});

		Self { cancel, timer }
	}

	pub fn token(&self) -> &CancellationToken {
		&self.cancel
	}
}

impl Drop for RequestScope {
	fn drop(&mut self) {
		self.timer.abort();
		self.cancel.cancel();
	}
}
