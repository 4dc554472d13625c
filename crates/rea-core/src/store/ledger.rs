use std::{
    collections::{HashMap, HashSet},
    io::SeekFrom,
    path::PathBuf,
    sync::Arc,
};

use async_trait::async_trait;
use tokio::{
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
    sync::Mutex,
};

use super::store_err;
use crate::{
    domain::{NotificationRecord, OwnerId, PropertyId},
    ports::{Clock, NotificationLedger},
    Result,
};

#[derive(Default)]
struct LedgerState {
    seen: HashSet<(OwnerId, PropertyId)>,
    per_owner: HashMap<OwnerId, usize>,
}

impl LedgerState {
    fn insert(&mut self, owner: OwnerId, property: PropertyId) -> bool {
        let fresh = self.seen.insert((owner, property));
        if fresh {
            *self.per_owner.entry(owner).or_default() += 1;
        }
        fresh
    }
}

/// Notification ledger backed by an append-only JSON Lines file.
///
/// The whole file is loaded into a set at open. `record_notified` holds the
/// lock across the append, so check-and-insert is atomic per pair, and a
/// record only counts once its line has been synced to disk.
pub struct JsonLedger {
    path: Option<PathBuf>,
    clock: Arc<dyn Clock>,
    state: Mutex<LedgerState>,
}

impl JsonLedger {
    pub async fn open(path: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Result<Self> {
        let path = path.into();
        let mut state = LedgerState::default();
        let mut torn_tail = false;

        match tokio::fs::read_to_string(&path).await {
            Ok(txt) => {
                torn_tail = !txt.is_empty() && !txt.ends_with('\n');
                for (idx, line) in txt.lines().enumerate() {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<NotificationRecord>(line) {
                        Ok(rec) => {
                            state.insert(rec.owner, rec.property);
                        }
                        Err(e) => {
                            // Most likely a torn write from a crash mid-append.
                            tracing::warn!(
                                path = %path.display(),
                                line = idx + 1,
                                "skipping unreadable ledger line: {e}"
                            );
                        }
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(store_err("read ledger", e)),
        }

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| store_err("create ledger dir", e))?;
        }

        // Terminate a torn last line so the next append starts on its own line.
        if torn_tail {
            let mut file = tokio::fs::OpenOptions::new()
                .append(true)
                .open(&path)
                .await
                .map_err(|e| store_err("open ledger", e))?;
            file.write_all(b"\n")
                .await
                .map_err(|e| store_err("repair ledger", e))?;
        }

        tracing::info!(
            path = %path.display(),
            records = state.seen.len(),
            "notification ledger opened"
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
            state: Mutex::new(LedgerState::default()),
        }
    }

    /// Append one record and sync it.
    ///
    /// A line is only ever started at a line boundary: an unterminated tail
    /// left by an earlier failed append is closed first, and a failed append
    /// is truncated back to the previous length.
    async fn append(&self, rec: &NotificationRecord) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| store_err("open ledger", e))?;
        let len = file
            .metadata()
            .await
            .map_err(|e| store_err("stat ledger", e))?
            .len();

        let mut line = String::new();
        if len > 0 && !ends_with_newline(&mut file, len).await? {
            tracing::warn!(path = %path.display(), "closing unterminated ledger line");
            line.push('\n');
        }
        line.push_str(&serde_json::to_string(rec)?);
        line.push('\n');

        let written = async {
            file.write_all(line.as_bytes())
                .await
                .map_err(|e| store_err("append ledger", e))?;
            file.sync_data()
                .await
                .map_err(|e| store_err("sync ledger", e))
        }
        .await;

        if written.is_err() {
            if let Err(e) = file.set_len(len).await {
                tracing::error!(path = %path.display(), "could not roll back ledger append: {e}");
            }
        }
        written
    }
}

async fn ends_with_newline(file: &mut tokio::fs::File, len: u64) -> Result<bool> {
    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1))
        .await
        .map_err(|e| store_err("seek ledger", e))?;
    file.read_exact(&mut last)
        .await
        .map_err(|e| store_err("read ledger", e))?;
    Ok(last[0] == b'\n')
}

#[async_trait]
impl NotificationLedger for JsonLedger {
    async fn has_notified(&self, owner: OwnerId, property: &PropertyId) -> Result<bool> {
        let st = self.state.lock().await;
        Ok(st.seen.contains(&(owner, property.clone())))
    }

    async fn record_notified(&self, owner: OwnerId, property: &PropertyId) -> Result<bool> {
        let mut st = self.state.lock().await;
        let key = (owner, property.clone());
        if st.seen.contains(&key) {
            return Ok(false);
        }

        let rec = NotificationRecord {
            owner,
            property: property.clone(),
            notified_at: self.clock.now(),
        };
        self.append(&rec).await?;
        st.insert(key.0, key.1);
        Ok(true)
    }

    async fn count_for(&self, owner: OwnerId) -> Result<usize> {
        let st = self.state.lock().await;
        Ok(st.per_owner.get(&owner).copied().unwrap_or(0))
    }
}
