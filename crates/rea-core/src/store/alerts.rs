use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::store_err;
use crate::{
    domain::{Alert, AlertCriteria, AlertId, OwnerId},
    ports::{AlertStore, Clock},
    Error, Result,
};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct AlertFile {
    last_id: u64,
    alerts: Vec<Alert>,
}

/// Alert store persisted as a single JSON document.
///
/// Every mutation rewrites the document through a temp file + rename, and the
/// in-memory copy is only replaced once the write succeeded.
pub struct JsonAlertStore {
    path: Option<PathBuf>,
    clock: Arc<dyn Clock>,
    state: Mutex<AlertFile>,
}

impl JsonAlertStore {
    pub async fn open(path: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Result<Self> {
        let path = path.into();
        let state = match tokio::fs::read_to_string(&path).await {
            Ok(txt) if txt.trim().is_empty() => AlertFile::default(),
            Ok(txt) => serde_json::from_str(&txt)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => AlertFile::default(),
            Err(e) => return Err(store_err("read alerts", e)),
        };

        tracing::info!(
            path = %path.display(),
            alerts = state.alerts.len(),
            "alert store opened"
        );

        Ok(Self {
            path: Some(path),
            clock,
            state: Mutex::new(state),
        })
    }

    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        Self {
            path: None,
            clock,
            state: Mutex::new(AlertFile::default()),
        }
    }

    async fn persist(&self, file: &AlertFile) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        write_atomically(path, file).await
    }

    /// Apply `f` to the owner's alert `id` and persist the result.
    async fn modify(
        &self,
        owner: OwnerId,
        id: AlertId,
        f: impl FnOnce(&mut Alert) -> Result<()>,
    ) -> Result<Alert> {
        let mut st = self.state.lock().await;
        let mut next = st.clone();

        let alert = next
            .alerts
            .iter_mut()
            .find(|a| a.id == id && a.owner == owner)
            .ok_or(Error::AlertNotFound(id))?;
        f(alert)?;
        let updated = alert.clone();

        self.persist(&next).await?;
        *st = next;
        Ok(updated)
    }
}

async fn write_atomically(path: &Path, file: &AlertFile) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| store_err("create alert dir", e))?;
    }

    let txt = serde_json::to_string_pretty(file)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, txt)
        .await
        .map_err(|e| store_err("write alerts", e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| store_err("replace alerts", e))?;
    Ok(())
}

#[async_trait]
impl AlertStore for JsonAlertStore {
    async fn list_active(&self) -> Result<Vec<Alert>> {
        let st = self.state.lock().await;
        Ok(st.alerts.iter().filter(|a| a.active).cloned().collect())
    }

    async fn get(&self, owner: OwnerId) -> Result<Vec<Alert>> {
        let st = self.state.lock().await;
        Ok(st
            .alerts
            .iter()
            .filter(|a| a.owner == owner)
            .cloned()
            .collect())
    }

    async fn create(&self, owner: OwnerId, criteria: AlertCriteria) -> Result<Alert> {
        criteria.validate()?;

        let mut st = self.state.lock().await;
        let mut next = st.clone();
        next.last_id += 1;
        let alert = Alert {
            id: AlertId(next.last_id),
            owner,
            criteria,
            active: true,
            created_at: self.clock.now(),
        };
        next.alerts.push(alert.clone());

        self.persist(&next).await?;
        *st = next;

        tracing::info!(owner = %owner, alert_id = %alert.id, shape = %alert.shape(), "alert created");
        Ok(alert)
    }

    async fn update(&self, owner: OwnerId, id: AlertId, criteria: AlertCriteria) -> Result<Alert> {
        criteria.validate()?;
        self.modify(owner, id, |a| {
            a.criteria = criteria;
            Ok(())
        })
        .await
    }

    async fn deactivate(&self, owner: OwnerId, id: AlertId) -> Result<Alert> {
        self.modify(owner, id, |a| {
            a.active = false;
            Ok(())
        })
        .await
    }

    async fn activate(&self, owner: OwnerId, id: AlertId) -> Result<Alert> {
        self.modify(owner, id, |a| {
            a.active = true;
            Ok(())
        })
        .await
    }
}
