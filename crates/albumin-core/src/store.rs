use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::date::{parse_zone, CandidateTime, Method, TimestampCandidate};
use crate::error::{Error, Result, ValidationError};
use crate::identity::Identity;

pub const DATETIME: &str = "datetime";
pub const DATETIME_METHOD: &str = "datetime-method";
pub const TIMEZONE: &str = "timezone";
pub const YEAR: &str = "year";
pub const MONTH: &str = "month";
pub const DAY: &str = "day";

/// Fields the timestamp bookkeeping owns.
pub const INTERNAL_FIELDS: &[&str] = &[DATETIME, DATETIME_METHOD, TIMEZONE, YEAR, MONTH, DAY];

const LAST_CHANGED_SUFFIX: &str = "lastchanged";

/// Stored datetimes are UTC in this layout.
const STORE_FORMAT: &str = "%Y-%m-%d@%H-%M-%S";

/// Current store file format version
const STORE_VERSION: u32 = 1;

/// Default location of the store inside a library.
pub const STORE_DIR: &str = ".albumin";
pub const STORE_FILENAME: &str = "metadata.json";

/// Key/value metadata keyed by content identity.
pub trait MetadataStore {
    fn get(&self, key: &Identity, field: &str) -> Result<Option<String>>;

    /// Set a field and record when it changed.
    fn set(&mut self, key: &Identity, field: &str, value: &str) -> Result<()>;

    fn remove(&mut self, key: &Identity, field: &str) -> Result<()>;

    fn last_changed(&self, key: &Identity, field: &str) -> Result<Option<DateTime<Utc>>>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldValue {
    pub value: String,
    pub last_changed: DateTime<Utc>,
}

type Records = BTreeMap<Identity, BTreeMap<String, FieldValue>>;

/// Store held entirely in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    records: Records,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> impl Iterator<Item = &Identity> {
        self.records.keys()
    }
}

impl MetadataStore for MemoryStore {
    fn get(&self, key: &Identity, field: &str) -> Result<Option<String>> {
        Ok(self
            .records
            .get(key)
            .and_then(|fields| fields.get(field))
            .map(|f| f.value.clone()))
    }

    fn set(&mut self, key: &Identity, field: &str, value: &str) -> Result<()> {
        self.records.entry(key.clone()).or_default().insert(
            field.to_string(),
            FieldValue {
                value: value.to_string(),
                last_changed: Utc::now(),
            },
        );
        Ok(())
    }

    fn remove(&mut self, key: &Identity, field: &str) -> Result<()> {
        if let Some(fields) = self.records.get_mut(key) {
            fields.remove(field);
            if fields.is_empty() {
                self.records.remove(key);
            }
        }
        Ok(())
    }

    fn last_changed(&self, key: &Identity, field: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .records
            .get(key)
            .and_then(|fields| fields.get(field))
            .map(|f| f.last_changed))
    }
}

/// On-disk layout of a [`JsonStore`].
#[derive(Debug, Deserialize)]
struct StoreFile {
    version: u32,
    records: Records,
}

/// Memory store persisted as a JSON file. Changes reach disk on
/// [`JsonStore::save`].
#[derive(Debug)]
pub struct JsonStore {
    path: PathBuf,
    inner: MemoryStore,
    dirty: bool,
}

impl JsonStore {
    /// The store of the library rooted at `library`.
    pub fn in_library(library: &Path) -> Result<Self> {
        Self::open(library.join(STORE_DIR).join(STORE_FILENAME))
    }

    /// Load the store at `path`, or start an empty one if it does not exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let records = if path.exists() {
            let reader = BufReader::new(File::open(&path)?);
            let file: StoreFile = serde_json::from_reader(reader)?;
            if file.version != STORE_VERSION {
                return Err(Error::UnsupportedStoreVersion(file.version));
            }
            file.records
        } else {
            Records::new()
        };
        tracing::debug!(path = %path.display(), keys = records.len(), "opened metadata store");
        Ok(Self {
            path,
            inner: MemoryStore { records },
            dirty: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the store has ever been saved.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn keys(&self) -> impl Iterator<Item = &Identity> {
        self.inner.keys()
    }

    /// Write to a temp file first, then rename over the store.
    pub fn save(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let temp_path = self.path.with_extension("json.tmp");
        {
            let mut writer = BufWriter::new(File::create(&temp_path)?);
            let file = StoreFileRef {
                version: STORE_VERSION,
                records: &self.inner.records,
            };
            serde_json::to_writer_pretty(&mut writer, &file)?;
            std::io::Write::flush(&mut writer)?;
        }
        fs::rename(&temp_path, &self.path)?;
        self.dirty = false;
        Ok(())
    }
}

#[derive(Serialize)]
struct StoreFileRef<'a> {
    version: u32,
    records: &'a Records,
}

impl MetadataStore for JsonStore {
    fn get(&self, key: &Identity, field: &str) -> Result<Option<String>> {
        self.inner.get(key, field)
    }

    fn set(&mut self, key: &Identity, field: &str, value: &str) -> Result<()> {
        self.dirty = true;
        self.inner.set(key, field, value)
    }

    fn remove(&mut self, key: &Identity, field: &str) -> Result<()> {
        self.dirty = true;
        self.inner.remove(key, field)
    }

    fn last_changed(&self, key: &Identity, field: &str) -> Result<Option<DateTime<Utc>>> {
        self.inner.last_changed(key, field)
    }
}

fn corrupt(key: &Identity, field: &str, value: &str) -> Error {
    Error::CorruptField {
        key: key.to_string(),
        field: field.to_string(),
        value: value.to_string(),
    }
}

/// The zone recorded for `key`, if any.
pub fn stored_zone<S: MetadataStore + ?Sized>(store: &S, key: &Identity) -> Result<Option<Tz>> {
    match store.get(key, TIMEZONE)? {
        Some(name) => parse_zone(&name)
            .map(Some)
            .map_err(|_| corrupt(key, TIMEZONE, &name)),
        None => Ok(None),
    }
}

/// The recorded timestamp for `key`, in its recorded zone (UTC if none).
pub fn stored_timestamp<S: MetadataStore + ?Sized>(
    store: &S,
    key: &Identity,
) -> Result<Option<TimestampCandidate>> {
    let Some(value) = store.get(key, DATETIME)? else {
        return Ok(None);
    };
    let naive = NaiveDateTime::parse_from_str(&value, STORE_FORMAT)
        .map_err(|_| corrupt(key, DATETIME, &value))?;
    let method_name = store
        .get(key, DATETIME_METHOD)?
        .ok_or_else(|| corrupt(key, DATETIME_METHOD, ""))?;
    let method: Method = method_name
        .parse()
        .map_err(|_| corrupt(key, DATETIME_METHOD, &method_name))?;
    let zone = stored_zone(store, key)?.unwrap_or(Tz::UTC);

    let moment = Utc.from_utc_datetime(&naive).with_timezone(&zone);
    Ok(Some(TimestampCandidate::new(method, CandidateTime::Zoned(moment))))
}

/// Record `candidate` for `key`, with the derived date fields.
/// Values without a zone are recorded as UTC.
pub fn record_timestamp<S: MetadataStore + ?Sized>(
    store: &mut S,
    key: &Identity,
    candidate: &TimestampCandidate,
) -> Result<()> {
    let zone = candidate.zone().unwrap_or(Tz::UTC);
    let utc = candidate.time.to_utc();
    let value = utc.format(STORE_FORMAT).to_string();

    store.set(key, YEAR, &format!("{:04}", utc.year()))?;
    store.set(key, MONTH, &format!("{:02}", utc.month()))?;
    store.set(key, DAY, &format!("{:02}", utc.day()))?;
    store.set(key, DATETIME, &value)?;
    store.set(key, DATETIME_METHOD, candidate.method.name())?;
    store.set(key, TIMEZONE, zone.name())?;
    tracing::debug!(%key, %candidate, "recorded timestamp");
    Ok(())
}

/// User tags must not shadow the timestamp bookkeeping.
pub fn validate_user_field(name: &str) -> std::result::Result<(), ValidationError> {
    if INTERNAL_FIELDS.contains(&name) || name.ends_with(LAST_CHANGED_SUFFIX) {
        return Err(ValidationError::ReservedTag(name.to_string()));
    }
    Ok(())
}
