use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use shipment_quota::{
    create_router, ApiState, NewSubscription, QuotaGuard, ResetSchedule, ResetScheduler,
    Subscription, SubscriptionDatabase, SubscriptionStatus, SubscriptionTier,
};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::debug;

/// Guard, scheduler and a file-backed store sharing one temp directory.
pub struct QuotaFixture {
    pub database: Arc<SubscriptionDatabase>,
    pub guard: QuotaGuard,
    pub scheduler: ResetScheduler,
    pub temp_dir: TempDir,
}

impl QuotaFixture {
    pub fn new(schedule: ResetSchedule) -> Result<Self> {
        let temp_dir = TempDir::new().context("creating fixture tempdir")?;
        let database = Arc::new(
            SubscriptionDatabase::open(temp_dir.path(), Duration::from_secs(5))
                .context("opening fixture database")?,
        );
        let guard = QuotaGuard::new(database.clone());
        let scheduler = ResetScheduler::new(database.clone(), schedule);
        Ok(Self {
            database,
            guard,
            scheduler,
            temp_dir,
        })
    }

    pub fn subscribe(
        &self,
        subscriber_id: &str,
        tier: SubscriptionTier,
        limit: u64,
    ) -> Result<Subscription> {
        self.database
            .create_subscription(&NewSubscription {
                subscriber_id: subscriber_id.to_string(),
                tier,
                monthly_shipment_limit: limit,
                status: SubscriptionStatus::Active,
            })
            .with_context(|| format!("creating subscription for {subscriber_id}"))
    }

    /// Creates `count` active subscribers named `{prefix}-{n}`.
    pub fn seed_subscribers(
        &self,
        prefix: &str,
        count: usize,
        limit: u64,
    ) -> Result<Vec<Subscription>> {
        (0..count)
            .map(|n| self.subscribe(&format!("{prefix}-{n}"), SubscriptionTier::Basic, limit))
            .collect()
    }
}

/// The service router bound to an ephemeral local port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub handle: JoinHandle<()>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub async fn spawn_test_server(fixture: &QuotaFixture) -> Result<TestServer> {
    let state = Arc::new(ApiState::new(
        fixture.guard.clone(),
        fixture.scheduler.clone(),
        fixture.database.clone(),
    ));
    let router = create_router(state);
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .context("binding test listener")?;
    let addr = listener.local_addr().context("reading test listener address")?;
    debug!(%addr, "test server listening");

    let handle = tokio::spawn(async move {
        if let Err(err) = axum_serve(listener, router).await {
            tracing::error!(error = %err, "test server stopped");
        }
    });

    Ok(TestServer { addr, handle })
}

async fn axum_serve(listener: TcpListener, router: axum::Router) -> std::io::Result<()> {
    axum::serve(listener, router.into_make_service()).await
}

pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("warn"))
        .with_test_writer()
        .try_init();
}
