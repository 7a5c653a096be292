use std::sync::Arc;

use chrono::Utc;
use mongodb::Client;

use crate::{
    auth::{Authenticator, SessionAuthenticator},
    config::AppConfig,
    gateway::rooms::RoomRegistry,
    metrics::Metrics,
    notify::{LogNotifier, Notifier},
    presence::{self, PresenceRegistry},
    store::ConversationStore,
};

pub struct AppState {
    pub store: ConversationStore,
    pub presence: PresenceRegistry,
    pub rooms: RoomRegistry,
    pub auth: Arc<dyn Authenticator>,
    pub notifier: Arc<dyn Notifier>,
}

pub struct AppStateBuilder {
    mongo_url: Option<String>,
    database_name: String,
    auth: Option<Arc<dyn Authenticator>>,
    notifier: Option<Arc<dyn Notifier>>,
}

impl AppStateBuilder {
    pub fn new() -> Self {
        Self {
            mongo_url: None,
            database_name: "linkwave".to_string(),
            auth: None,
            notifier: None,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new()
            .with_mongo_url(config.mongo_url.clone())
            .with_database_name(config.database_name.clone())
    }

    pub fn with_mongo_url(mut self, url: String) -> Self {
        self.mongo_url = Some(url);
        self
    }

    pub fn with_database_name(mut self, name: String) -> Self {
        self.database_name = name;
        self
    }

    pub fn with_authenticator(mut self, auth: Arc<dyn Authenticator>) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub async fn build(self) -> Result<AppState, Box<dyn std::error::Error>> {
        let url = self
            .mongo_url
            .ok_or("mongo_url is required to build AppState")?;

        let client = Client::with_uri_str(&url).await?;
        let db = client.database(&self.database_name);

        let store = ConversationStore::new(&db);
        store.ensure_indexes().await?;

        let auth = self
            .auth
            .unwrap_or_else(|| Arc::new(SessionAuthenticator::new(&db)));
        let notifier = self.notifier.unwrap_or_else(|| Arc::new(LogNotifier));

        Ok(AppState {
            store,
            presence: PresenceRegistry::new(),
            rooms: RoomRegistry::new(),
            auth,
            notifier,
        })
    }
}

/// Periodic housekeeping: presence sweep, stale room membership pruning and
/// the online-users gauge.
pub fn spawn_maintenance(state: Arc<AppState>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(presence::SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            state
                .presence
                .sweep(Utc::now(), presence::idle_threshold())
                .await;
            state.rooms.prune_closed().await;
            Metrics::set_online_users(state.presence.snapshot().await.len());
        }
    });
}
