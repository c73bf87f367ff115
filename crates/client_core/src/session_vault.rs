use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use session_store::SessionStore;
use shared::domain::UserRecord;
use tokio::sync::Mutex;
use tracing::warn;

const TOKEN_KEY: &str = "auth_token";
const USER_KEY: &str = "auth_user";

/// Token and profile as mirrored to storage. The pair is written and cleared
/// together; a vault never holds one without the other.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedSession {
    pub token: String,
    pub user: UserRecord,
}

#[async_trait]
pub trait SessionVault: Send + Sync {
    async fn load(&self) -> Result<Option<PersistedSession>>;
    async fn save(&self, session: &PersistedSession) -> Result<()>;
    async fn clear(&self) -> Result<()>;
}

/// Vault that keeps the session only for the lifetime of the process.
#[derive(Default)]
pub struct MemorySessionVault {
    slot: Mutex<Option<PersistedSession>>,
}

#[async_trait]
impl SessionVault for MemorySessionVault {
    async fn load(&self) -> Result<Option<PersistedSession>> {
        Ok(self.slot.lock().await.clone())
    }

    async fn save(&self, session: &PersistedSession) -> Result<()> {
        *self.slot.lock().await = Some(session.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        *self.slot.lock().await = None;
        Ok(())
    }
}

/// Vault backed by the sqlite key-value store, under the keys `auth_token`
/// (raw string) and `auth_user` (JSON-encoded profile).
pub struct DurableSessionVault {
    store: SessionStore,
}

impl DurableSessionVault {
    pub async fn initialize(database_url: &str) -> Result<Arc<Self>> {
        let store = SessionStore::new(database_url)
            .await
            .with_context(|| format!("failed to initialize session storage at '{database_url}'"))?;
        Ok(Arc::new(Self { store }))
    }
}

#[async_trait]
impl SessionVault for DurableSessionVault {
    async fn load(&self) -> Result<Option<PersistedSession>> {
        let token = self.store.get(TOKEN_KEY).await?;
        let user_json = self.store.get(USER_KEY).await?;

        let (Some(token), Some(user_json)) = (token, user_json) else {
            // A half-present pair violates the write-together invariant;
            // treat it as anonymous rather than guessing.
            return Ok(None);
        };

        let user: UserRecord = match serde_json::from_str(&user_json) {
            Ok(user) => user,
            Err(err) => {
                warn!("session: discarding unreadable stored profile: {err}");
                return Ok(None);
            }
        };

        Ok(Some(PersistedSession { token, user }))
    }

    async fn save(&self, session: &PersistedSession) -> Result<()> {
        let user_json =
            serde_json::to_string(&session.user).context("failed to encode stored profile")?;
        self.store
            .put_many(&[(TOKEN_KEY, &session.token), (USER_KEY, &user_json)])
            .await
    }

    async fn clear(&self) -> Result<()> {
        self.store.delete_many(&[TOKEN_KEY, USER_KEY]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::domain::{Role, UserId};
    use std::time::{SystemTime, UNIX_EPOCH};

    fn sample_session() -> PersistedSession {
        PersistedSession {
            token: "token-abc".to_string(),
            user: UserRecord {
                id: UserId(1),
                username: "alice".to_string(),
                email: "alice@example.com".to_string(),
                role: Role::Admin,
                created_at: None,
            },
        }
    }

    #[tokio::test]
    async fn memory_vault_round_trips_and_clears() {
        let vault = MemorySessionVault::default();
        assert_eq!(vault.load().await.expect("empty load"), None);

        vault.save(&sample_session()).await.expect("save");
        assert_eq!(
            vault.load().await.expect("load"),
            Some(sample_session())
        );

        vault.clear().await.expect("clear");
        assert_eq!(vault.load().await.expect("cleared load"), None);
    }

    #[tokio::test]
    async fn durable_vault_persists_across_reopen() {
        let unique = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        let db_path = std::env::temp_dir().join(format!("auth_vault_reopen_{unique}.sqlite3"));
        let database_url = format!("sqlite://{}", db_path.display());

        let vault = DurableSessionVault::initialize(&database_url)
            .await
            .expect("vault");
        vault.save(&sample_session()).await.expect("save");

        let reopened = DurableSessionVault::initialize(&database_url)
            .await
            .expect("reopen");
        assert_eq!(
            reopened.load().await.expect("load"),
            Some(sample_session())
        );

        reopened.clear().await.expect("clear");
        assert_eq!(reopened.load().await.expect("cleared load"), None);

        let _ = std::fs::remove_file(&db_path);
    }

    #[tokio::test]
    async fn durable_vault_treats_half_present_pair_as_anonymous() {
        let unique = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        let db_path = std::env::temp_dir().join(format!("auth_vault_half_{unique}.sqlite3"));
        let database_url = format!("sqlite://{}", db_path.display());

        let store = SessionStore::new(&database_url).await.expect("store");
        store
            .put_many(&[("auth_token", "orphan-token")])
            .await
            .expect("write token only");

        let vault = DurableSessionVault::initialize(&database_url)
            .await
            .expect("vault");
        assert_eq!(vault.load().await.expect("load"), None);

        let _ = std::fs::remove_file(&db_path);
    }
}
