#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;

use push_dispatch::config::SettingsService;
use push_dispatch::database::models::{SubscriptionKeys, keys};
use push_dispatch::database::repositories::{
    SqlxDispatchLogRepository, SqlxFarmMemberRepository, SqlxPreferenceRepository,
    SqlxSettingsRepository, SqlxSubscriptionRepository,
};
use push_dispatch::database::{self, DbPool};
use push_dispatch::domain::RetryPolicy;
use push_dispatch::push::{
    AudienceSelector, DeliveryEngine, DispatchReporter, DispatchService, PushError, PushMessage,
    PushTarget, PushTransport, SettingsKeyProvider, SubscriptionService, VapidKeys,
    generate_vapid_keys,
};

/// File-backed database in a temp dir; keep the dir alive for the test.
pub async fn test_pool(name: &str) -> (TempDir, DbPool) {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join(format!("{}.db", name));
    let db_url = format!(
        "sqlite:{}?mode=rwc",
        db_path.to_string_lossy().replace('\\', "/")
    );
    let pool = database::init_pool(&db_url, 4).await.unwrap();
    database::run_migrations(&pool).await.unwrap();
    (dir, pool)
}

pub fn browser_keys(endpoint: &str) -> SubscriptionKeys {
    SubscriptionKeys {
        endpoint: endpoint.to_string(),
        p256dh: "B".repeat(87),
        auth: "k".repeat(22),
    }
}

/// Per-endpoint scripted push service; unscripted sends succeed.
#[derive(Default)]
pub struct FakePushService {
    scripts: Mutex<HashMap<String, VecDeque<Result<(), PushError>>>>,
    calls: Mutex<Vec<String>>,
}

impl FakePushService {
    pub fn fail_always(&self, endpoint: &str, status: u16) {
        let results = (0..8)
            .map(|_| Err(PushError::status(status, format!("status {}", status))))
            .collect();
        self.scripts.lock().insert(endpoint.to_string(), results);
    }

    pub fn calls_to(&self, endpoint: &str) -> usize {
        self.calls.lock().iter().filter(|e| *e == endpoint).count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl PushTransport for FakePushService {
    async fn send(
        &self,
        target: &PushTarget<'_>,
        _message: &PushMessage<'_>,
        _keys: &VapidKeys,
    ) -> Result<(), PushError> {
        self.calls.lock().push(target.endpoint.to_string());
        let next = self
            .scripts
            .lock()
            .get_mut(target.endpoint)
            .and_then(|q| q.pop_front());
        next.unwrap_or(Ok(()))
    }
}

pub struct TestApp {
    pub _dir: TempDir,
    pub pool: DbPool,
    pub subscriptions: Arc<SqlxSubscriptionRepository>,
    pub preferences: Arc<SqlxPreferenceRepository>,
    pub farms: Arc<SqlxFarmMemberRepository>,
    pub logs: Arc<SqlxDispatchLogRepository>,
    pub settings: Arc<SettingsService>,
    pub push: Arc<FakePushService>,
    pub lifecycle: SubscriptionService,
    pub dispatcher: DispatchService,
}

/// Short backoff so retries finish quickly against a real database.
pub fn fast_retry_policy() -> RetryPolicy {
    RetryPolicy::default().with_backoff(Duration::from_millis(5), Duration::from_millis(20))
}

pub async fn test_app(name: &str) -> TestApp {
    let (dir, pool) = test_pool(name).await;
    let subscriptions = Arc::new(SqlxSubscriptionRepository::new(pool.clone()));
    let preferences = Arc::new(SqlxPreferenceRepository::new(pool.clone()));
    let farms = Arc::new(SqlxFarmMemberRepository::new(pool.clone()));
    let logs = Arc::new(SqlxDispatchLogRepository::new(pool.clone()));
    let settings = Arc::new(SettingsService::new(Arc::new(SqlxSettingsRepository::new(
        pool.clone(),
    ))));

    let (public, private) = generate_vapid_keys();
    settings.set(keys::VAPID_PUBLIC_KEY, &public).await.unwrap();
    settings.set(keys::VAPID_PRIVATE_KEY, &private).await.unwrap();

    let push = Arc::new(FakePushService::default());
    let engine = DeliveryEngine::new(
        push.clone(),
        subscriptions.clone(),
        Arc::new(SettingsKeyProvider::new(settings.clone(), None)),
        fast_retry_policy(),
        8,
    );
    let dispatcher = DispatchService::new(
        AudienceSelector::new(subscriptions.clone(), preferences.clone()),
        engine,
        DispatchReporter::new(Some(logs.clone())),
        settings.clone(),
    )
    .with_farm_members(farms.clone());

    TestApp {
        _dir: dir,
        lifecycle: SubscriptionService::new(subscriptions.clone(), preferences.clone()),
        pool,
        subscriptions,
        preferences,
        farms,
        logs,
        settings,
        push,
        dispatcher,
    }
}
