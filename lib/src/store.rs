use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use color_eyre::{eyre::eyre, eyre::WrapErr, Result};
use lazy_static::lazy_static;
use regex::Regex;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::selector::Record;
use crate::sitemap::Sitemap;

lazy_static! {
    static ref UNSAFE_NAME: Regex = Regex::new(r"[^A-Za-z0-9_$()+\-]").unwrap();
}

/// Persistence seam: sitemap definitions plus the records a scrape yields.
#[async_trait]
pub trait Store: Send + Sync {
    async fn sitemap_ids(&self) -> Result<Vec<String>>;
    async fn get_sitemap(&self, sitemap_id: &str) -> Result<Sitemap>;
    async fn save_sitemap(&self, sitemap: &Sitemap) -> Result<()>;
    async fn remove_sitemap(&self, sitemap_id: &str) -> Result<()>;
    /// Appends one record. Control fields are stripped and an empty record
    /// is dropped silently.
    async fn save_record(&self, sitemap_id: &str, record: &Record) -> Result<()>;
    async fn records(&self, sitemap_id: &str) -> Result<Vec<Record>>;
    async fn clear_records(&self, sitemap_id: &str) -> Result<()>;
}

/// Drops the `_`-prefixed control fields before a record is persisted.
pub fn persistable(record: &Record) -> Record {
    record
        .iter()
        .filter(|(key, _)| !key.starts_with('_'))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

fn sanitize_name(sitemap_id: &str) -> String {
    UNSAFE_NAME.replace_all(sitemap_id, "_").into_owned()
}

/// Directory-backed store: one `<id>.json` definition and one
/// `<id>.data.ndjson` record log per sitemap.
pub struct JsonStore {
    root: PathBuf,
}

impl JsonStore {
    pub fn new<P: AsRef<Path>>(root: P) -> JsonStore {
        JsonStore {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn sitemap_path(&self, sitemap_id: &str) -> PathBuf {
        self.root.join(format!("{}.json", sanitize_name(sitemap_id)))
    }

    fn data_path(&self, sitemap_id: &str) -> PathBuf {
        self.root
            .join(format!("{}.data.ndjson", sanitize_name(sitemap_id)))
    }
}

#[async_trait]
impl Store for JsonStore {
    async fn sitemap_ids(&self) -> Result<Vec<String>> {
        let mut ids = vec![];
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(_) => return Ok(ids),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(id) = name.strip_suffix(".json") {
                ids.push(id.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn get_sitemap(&self, sitemap_id: &str) -> Result<Sitemap> {
        let path = self.sitemap_path(sitemap_id);
        let raw = fs::read_to_string(&path)
            .await
            .wrap_err_with(|| format!("no sitemap stored under {:?}", path))?;
        Sitemap::from_json(&raw).map_err(|err| eyre!(err))
    }

    async fn save_sitemap(&self, sitemap: &Sitemap) -> Result<()> {
        if sitemap.id.is_empty() {
            return Err(eyre!("cannot save a sitemap without an id"));
        }
        fs::create_dir_all(&self.root).await?;
        let raw = sitemap.to_json().map_err(|err| eyre!(err))?;
        fs::write(self.sitemap_path(&sitemap.id), raw).await?;
        Ok(())
    }

    async fn remove_sitemap(&self, sitemap_id: &str) -> Result<()> {
        fs::remove_file(self.sitemap_path(sitemap_id))
            .await
            .wrap_err_with(|| format!("no sitemap stored as {:?}", sitemap_id))
    }

    async fn save_record(&self, sitemap_id: &str, record: &Record) -> Result<()> {
        let record = persistable(record);
        if record.is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.root).await?;
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.data_path(sitemap_id))
            .await?;
        file.write_all(line.as_bytes()).await?;
        Ok(())
    }

    async fn records(&self, sitemap_id: &str) -> Result<Vec<Record>> {
        let raw = match fs::read_to_string(self.data_path(sitemap_id)).await {
            Ok(raw) => raw,
            Err(_) => return Ok(vec![]),
        };
        let mut records = vec![];
        for line in raw.lines().filter(|l| !l.trim().is_empty()) {
            records.push(serde_json::from_str(line)?);
        }
        Ok(records)
    }

    async fn clear_records(&self, sitemap_id: &str) -> Result<()> {
        match fs::remove_file(self.data_path(sitemap_id)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// In-memory store for tests and dry runs.
#[derive(Default)]
pub struct MemoryStore {
    sitemaps: Mutex<HashMap<String, String>>,
    data: Mutex<HashMap<String, Vec<Record>>>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn sitemap_ids(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self.sitemaps.lock().unwrap().keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    async fn get_sitemap(&self, sitemap_id: &str) -> Result<Sitemap> {
        let sitemaps = self.sitemaps.lock().unwrap();
        let raw = sitemaps
            .get(sitemap_id)
            .ok_or_else(|| eyre!("no sitemap stored as {:?}", sitemap_id))?;
        Sitemap::from_json(raw).map_err(|err| eyre!(err))
    }

    async fn save_sitemap(&self, sitemap: &Sitemap) -> Result<()> {
        let raw = sitemap.to_json().map_err(|err| eyre!(err))?;
        self.sitemaps
            .lock()
            .unwrap()
            .insert(sitemap.id.clone(), raw);
        Ok(())
    }

    async fn remove_sitemap(&self, sitemap_id: &str) -> Result<()> {
        self.sitemaps.lock().unwrap().remove(sitemap_id);
        Ok(())
    }

    async fn save_record(&self, sitemap_id: &str, record: &Record) -> Result<()> {
        let record = persistable(record);
        if record.is_empty() {
            return Ok(());
        }
        self.data
            .lock()
            .unwrap()
            .entry(sitemap_id.to_string())
            .or_default()
            .push(record);
        Ok(())
    }

    async fn records(&self, sitemap_id: &str) -> Result<Vec<Record>> {
        Ok(self
            .data
            .lock()
            .unwrap()
            .get(sitemap_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn clear_records(&self, sitemap_id: &str) -> Result<()> {
        self.data.lock().unwrap().remove(sitemap_id);
        Ok(())
    }
}
