use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use log::{error, info};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use super::memory::KeyTable;
use super::{select_events, AuditStore, KeyStore};
use crate::audit::{AuditEvent, AuditFilter, EventRange};
use crate::error::{KmsError, KmsResult};
use crate::key_management::KeyRecord;
use crate::types::KeyId;

/// Current key store file format version
pub const KEYSTORE_FORMAT_VERSION: u8 = 1;

/// Key store file format
#[derive(Debug, Serialize, Deserialize)]
struct KeyStoreFile {
    /// Version of the key store format
    version: u8,
    /// Live key records
    keys: Vec<KeyRecord>,
    /// Ids of deleted keys
    #[serde(default)]
    tombstones: Vec<KeyId>,
}

/// Key records persisted to a single JSON file
///
/// Every mutation rewrites the file through a temporary file and a rename,
/// and only becomes visible in memory once the write succeeded.
#[derive(Debug)]
pub struct FileKeyStore {
    path: PathBuf,
    table: RwLock<KeyTable>,
}

impl FileKeyStore {
    /// Open the store at `path`, creating an empty one if it doesn't exist
    pub fn open<P: AsRef<Path>>(path: P) -> KmsResult<Self> {
        let path = path.as_ref().to_path_buf();

        if !path.exists() {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .map_err(|e| KmsError::storage("create_keystore_dir", &e.to_string()))?;
            }
            let store = Self {
                path,
                table: RwLock::new(KeyTable::default()),
            };
            store.persist(&KeyTable::default())?;
            info!("Created key store at {}", store.path.display());
            return Ok(store);
        }

        let contents = fs::read_to_string(&path)
            .map_err(|e| KmsError::storage("read_keystore", &e.to_string()))?;
        let file: KeyStoreFile = serde_json::from_str(&contents)?;
        if file.version != KEYSTORE_FORMAT_VERSION {
            return Err(KmsError::Serialization(format!(
                "unsupported key store format version {}",
                file.version
            )));
        }

        info!(
            "Opened key store at {} with {} keys",
            path.display(),
            file.keys.len()
        );

        Ok(Self {
            path,
            table: RwLock::new(KeyTable::from_parts(file.keys, file.tombstones)),
        })
    }

    /// Default key store location under the user's home directory
    pub fn default_path() -> PathBuf {
        let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(".kms");
        path.push("keystore.json");
        path
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, table: &KeyTable) -> KmsResult<()> {
        let file = KeyStoreFile {
            version: KEYSTORE_FORMAT_VERSION,
            keys: table.records(),
            tombstones: table.tombstones(),
        };
        let serialized = serde_json::to_string_pretty(&file)?;

        let tmp_path = self.path.with_extension("json.tmp");
        let write = || -> std::io::Result<()> {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(serialized.as_bytes())?;
            tmp.sync_all()?;
            fs::rename(&tmp_path, &self.path)
        };

        write().map_err(|e| {
            error!("Failed to write key store {}: {}", self.path.display(), e);
            KmsError::storage("write_keystore", &e.to_string())
        })
    }

    fn mutate<T>(&self, change: impl FnOnce(&mut KeyTable) -> KmsResult<T>) -> KmsResult<T> {
        let mut table = self.table.write();
        let mut next = table.clone();
        let output = change(&mut next)?;
        self.persist(&next)?;
        *table = next;
        Ok(output)
    }
}

impl KeyStore for FileKeyStore {
    fn load(&self, key_id: &KeyId) -> KmsResult<KeyRecord> {
        self.table.read().load(key_id)
    }

    fn find_by_name(&self, name: &str) -> KmsResult<Option<KeyRecord>> {
        Ok(self.table.read().find_by_name(name))
    }

    fn list(&self) -> KmsResult<Vec<KeyRecord>> {
        Ok(self.table.read().records())
    }

    fn insert(&self, record: &KeyRecord) -> KmsResult<u64> {
        self.mutate(|table| table.insert(record))
    }

    fn save(&self, record: &KeyRecord, expected_revision: u64) -> KmsResult<u64> {
        self.mutate(|table| table.save(record, expected_revision))
    }

    fn remove(&self, key_id: &KeyId, expected_revision: u64) -> KmsResult<()> {
        self.mutate(|table| table.remove(key_id, expected_revision))
    }
}

/// Audit events persisted as JSON lines, one event per line
#[derive(Debug)]
pub struct FileAuditStore {
    path: PathBuf,
    events: RwLock<Vec<AuditEvent>>,
    writer: Mutex<()>,
}

impl FileAuditStore {
    /// Open the log at `path`, loading any existing events
    pub fn open<P: AsRef<Path>>(path: P) -> KmsResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut events = Vec::new();

        if path.exists() {
            let file =
                File::open(&path).map_err(|e| KmsError::storage("read_audit_log", &e.to_string()))?;
            for (index, line) in BufReader::new(file).lines().enumerate() {
                let line = line.map_err(|e| KmsError::storage("read_audit_log", &e.to_string()))?;
                if line.trim().is_empty() {
                    continue;
                }
                let event: AuditEvent = serde_json::from_str(&line).map_err(|e| {
                    KmsError::Serialization(format!("audit log line {}: {}", index + 1, e))
                })?;
                events.push(event);
            }
        } else if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| KmsError::storage("create_audit_dir", &e.to_string()))?;
        }

        Ok(Self {
            path,
            events: RwLock::new(events),
            writer: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditStore for FileAuditStore {
    fn append_event(&self, event: &AuditEvent) -> KmsResult<()> {
        let _writer = self.writer.lock();
        let line = serde_json::to_string(event)?;

        let append = || -> std::io::Result<()> {
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            writeln!(file, "{}", line)?;
            file.sync_data()
        };
        append().map_err(|e| {
            error!("Failed to append audit event to {}: {}", self.path.display(), e);
            KmsError::storage("append_audit_event", &e.to_string())
        })?;

        self.events.write().push(event.clone());
        Ok(())
    }

    fn load_events(&self, filter: &AuditFilter, range: EventRange) -> KmsResult<Vec<AuditEvent>> {
        Ok(select_events(&self.events.read(), filter, range))
    }

    fn last_event(&self) -> KmsResult<Option<AuditEvent>> {
        Ok(self.events.read().last().cloned())
    }
}
