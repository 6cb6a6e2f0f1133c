use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::{de::DeserializeOwned, Serialize};
use tokio::fs;
use tracing::warn;

use crate::{error::AppError, models::trip::TripEntry};

pub const LAST_ROUTE_KEY: &str = "lastRoute";
const TRIP_HISTORY_PREFIX: &str = "tripHistory_";

/// Key-value store of UTF-8 JSON documents, one file per key.
#[derive(Clone)]
pub struct StorageService {
    root: Arc<PathBuf>,
}

impl StorageService {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root: Arc::new(root),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn ensure_structure(&self) -> Result<(), AppError> {
        fs::create_dir_all(self.root()).await?;
        Ok(())
    }

    pub fn trip_history_key(identity: &str) -> String {
        format!("{TRIP_HISTORY_PREFIX}{identity}")
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file_name: String = key
            .chars()
            .map(|ch| match ch {
                '/' | '\\' | ':' => '_',
                other => other,
            })
            .collect();
        self.root().join(format!("{file_name}.json"))
    }

    pub async fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, AppError> {
        let path = self.path_for(key);
        if !fs::try_exists(&path).await? {
            return Ok(None);
        }
        let raw = fs::read(&path).await?;
        if raw.is_empty() {
            return Ok(None);
        }
        let value = serde_json::from_slice(&raw)?;
        Ok(Some(value))
    }

    pub async fn write_json<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
    ) -> Result<(), AppError> {
        self.ensure_structure().await?;
        let path = self.path_for(key);
        let data = serde_json::to_vec_pretty(value)?;
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, data).await?;
        fs::rename(&tmp_path, &path).await?;
        Ok(())
    }

    pub async fn load_trip_history(&self, identity: &str) -> Result<Vec<TripEntry>, AppError> {
        let key = Self::trip_history_key(identity);
        match self.read_json(&key).await {
            Ok(entries) => Ok(entries.unwrap_or_default()),
            Err(AppError::Json(err)) => {
                warn!(%identity, error = %err, "trip history is unreadable, starting empty");
                Ok(Vec::new())
            }
            Err(err) => Err(err),
        }
    }

    pub async fn save_trip_history(
        &self,
        identity: &str,
        entries: &[TripEntry],
    ) -> Result<(), AppError> {
        self.write_json(&Self::trip_history_key(identity), entries)
            .await
    }
}
