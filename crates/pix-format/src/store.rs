//! Append-only packet containers
//!
//! A container is a directory:
//!
//! ```text
//! header.json      version, created/modified, datasets, packet type table
//! packets.bin      fixed-width packet rows (raw_packet.bin for 0.0)
//! messages.bin     fixed-width message rows (1.0 and later)
//! ```
//!
//! The header's committed row counts are authoritative. An append writes
//! rows past the committed end, then commits by atomically replacing the
//! header; if anything fails before the commit the row files are truncated
//! back, so readers only ever see whole batches.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use pix_packet::{Packet, PacketType};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::codec::{self, EncodedBatch, MessageLookup, MessageRecord};
use crate::error::{FormatError, Result};
use crate::record::Record;
use crate::schema::{self, DatasetSchema, VersionSchema, LATEST_VERSION};
use crate::version::{check_write_version, resolve_read_version};

/// Header file name inside a container
pub const HEADER_FILE: &str = "header.json";
const HEADER_TMP_FILE: &str = "header.json.tmp";

/// Serialized description of one dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetHeader {
    /// `(name, type code)` per column, in row order
    pub fields: Vec<(String, String)>,
    /// Committed rows
    pub rows: u64,
}

/// Serialized container metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerHeader {
    pub version: String,
    /// Unix time of creation, seconds
    pub created: f64,
    /// Unix time of the last committed append, seconds
    pub modified: f64,
    pub datasets: BTreeMap<String, DatasetHeader>,
    /// Packet type code to name
    pub packet_types: BTreeMap<u8, String>,
}

impl ContainerHeader {
    fn new(schema: &VersionSchema) -> Self {
        let now = unix_now();
        let mut datasets = BTreeMap::new();
        for dataset in std::iter::once(&schema.packets).chain(schema.messages.as_ref()) {
            datasets.insert(
                dataset.name.to_string(),
                DatasetHeader {
                    fields: dataset.describe(),
                    rows: 0,
                },
            );
        }
        let packet_types = PacketType::ALL
            .iter()
            .map(|t| (t.code(), t.name().to_string()))
            .collect();
        Self {
            version: schema.version.to_string(),
            created: now,
            modified: now,
            datasets,
            packet_types,
        }
    }

    fn rows(&self, dataset: &str) -> u64 {
        self.datasets.get(dataset).map_or(0, |d| d.rows)
    }
}

/// Everything read back by [`RecordStore::from_file`]
#[derive(Debug, Clone, PartialEq)]
pub struct FileContents {
    pub packets: Vec<Packet>,
    pub version: String,
    pub created: f64,
    pub modified: f64,
}

/// An open container
#[derive(Debug)]
pub struct RecordStore {
    path: PathBuf,
    header: ContainerHeader,
    schema: &'static VersionSchema,
    writable: bool,
}

impl RecordStore {
    /// Open a container for writing, creating it if needed
    ///
    /// A new container is created at `version`, or [`LATEST_VERSION`] if
    /// none is given. An existing container only accepts no version or its
    /// own version exactly.
    pub fn create(path: impl AsRef<Path>, version: Option<&str>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let header_path = path.join(HEADER_FILE);

        if header_path.exists() {
            let header = read_header(&path)?;
            check_write_version(version, &header.version)?;
            let schema = writable_schema(&header.version)?;
            let store = Self {
                path,
                header,
                schema,
                writable: true,
            };
            store.validate()?;
            debug!("reopened container {} for writing", store.path.display());
            return Ok(store);
        }
        if path.exists() && !path.is_dir() {
            return Err(FormatError::NotAContainer(path));
        }

        let version = version.unwrap_or(LATEST_VERSION);
        let schema = writable_schema(version)?;
        fs::create_dir_all(&path)?;
        for dataset in std::iter::once(&schema.packets).chain(schema.messages.as_ref()) {
            File::create(dataset_path(&path, dataset))?;
        }

        let store = Self {
            path,
            header: ContainerHeader::new(schema),
            schema,
            writable: true,
        };
        store.commit(&store.header)?;
        info!(
            "created container {} at version {}",
            store.path.display(),
            version
        );
        Ok(store)
    }

    /// Open an existing container for reading
    ///
    /// `version` is `None` to accept whatever is stored, `"x.y"` to require
    /// exactly that version, or `"~x.y"` to accept any compatible one.
    pub fn open(path: impl AsRef<Path>, version: Option<&str>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let header = read_header(&path)?;
        let resolved = resolve_read_version(version, &header.version)?;
        let schema = schema::schema(&resolved)?;
        let store = Self {
            path,
            header,
            schema,
            writable: false,
        };
        store.validate()?;
        debug!(
            "opened container {} (version {}, {} packets)",
            store.path.display(),
            resolved,
            store.len()
        );
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored format version
    pub fn version(&self) -> &str {
        &self.header.version
    }

    /// Creation time, unix seconds
    pub fn created(&self) -> f64 {
        self.header.created
    }

    /// Time of the last committed append, unix seconds
    pub fn modified(&self) -> f64 {
        self.header.modified
    }

    pub fn header(&self) -> &ContainerHeader {
        &self.header
    }

    /// Committed packet rows
    pub fn len(&self) -> u64 {
        self.header.rows(self.schema.packets.name)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Committed message rows
    pub fn message_count(&self) -> u64 {
        self.schema
            .messages
            .as_ref()
            .map_or(0, |m| self.header.rows(m.name))
    }

    /// Append a batch of packets, all or nothing
    pub fn append(&mut self, packets: &[Packet]) -> Result<()> {
        if !self.writable {
            return Err(FormatError::NotWritable(self.path.clone()));
        }
        let batch = codec::encode_batch(packets, self.schema.version, self.message_count())?;

        let mut next = self.header.clone();
        next.modified = unix_now();
        if let Some(d) = next.datasets.get_mut(self.schema.packets.name) {
            d.rows += batch.packets.len() as u64;
        }
        if let Some(messages) = &self.schema.messages {
            if let Some(d) = next.datasets.get_mut(messages.name) {
                d.rows += batch.messages.len() as u64;
            }
        }

        let result = self
            .write_rows(&batch)
            .and_then(|()| self.commit(&next));
        match result {
            Ok(()) => {
                debug!(
                    "appended {} packets ({} messages) to {}",
                    batch.packets.len(),
                    batch.messages.len(),
                    self.path.display()
                );
                self.header = next;
                Ok(())
            }
            Err(e) => {
                warn!("append to {} failed: {}", self.path.display(), e);
                self.rollback();
                Err(e)
            }
        }
    }

    /// Lazily decode committed packets in `start..end`
    ///
    /// Bounds follow slice conventions: negative values count from the end,
    /// out-of-range values are clamped, and an empty range yields nothing.
    pub fn read(&self, start: Option<i64>, end: Option<i64>) -> Result<PacketReader> {
        let range = clamp_range(start, end, self.len());
        let dataset = &self.schema.packets;
        let mut file = BufReader::new(File::open(dataset_path(&self.path, dataset))?);
        file.seek(SeekFrom::Start(range.start * dataset.width() as u64))?;

        let messages = match &self.schema.messages {
            Some(m) => Some(MessageFile {
                file: File::open(dataset_path(&self.path, m))?,
                dataset: m,
                count: self.message_count(),
            }),
            None => None,
        };

        Ok(PacketReader {
            file,
            dataset,
            version: self.schema.version,
            messages,
            range,
        })
    }

    /// Decode every committed packet
    pub fn read_all(&self) -> Result<Vec<Packet>> {
        self.read(None, None)?.collect()
    }

    /// Decode every committed message row
    pub fn messages(&self) -> Result<Vec<MessageRecord>> {
        let Some(dataset) = &self.schema.messages else {
            return Ok(Vec::new());
        };
        let mut file = BufReader::new(File::open(dataset_path(&self.path, dataset))?);
        let mut row = vec![0u8; dataset.width()];
        let mut out = Vec::new();
        for _ in 0..self.message_count() {
            file.read_exact(&mut row)?;
            out.push(MessageRecord::from_record(&Record::from_bytes(dataset, &row)?));
        }
        Ok(out)
    }

    /// Write `packets` into the container at `path`, creating it if needed
    pub fn to_file(path: impl AsRef<Path>, packets: &[Packet], version: Option<&str>) -> Result<()> {
        Self::create(path, version)?.append(packets)
    }

    /// Read packets `start..end` and the header metadata from `path`
    pub fn from_file(
        path: impl AsRef<Path>,
        version: Option<&str>,
        start: Option<i64>,
        end: Option<i64>,
    ) -> Result<FileContents> {
        let store = Self::open(path, version)?;
        let packets = store.read(start, end)?.collect::<Result<Vec<_>>>()?;
        Ok(FileContents {
            packets,
            version: store.header.version.clone(),
            created: store.header.created,
            modified: store.header.modified,
        })
    }

    fn datasets(&self) -> impl Iterator<Item = &'static DatasetSchema> {
        let schema = self.schema;
        std::iter::once(&schema.packets).chain(schema.messages.as_ref())
    }

    fn validate(&self) -> Result<()> {
        for dataset in self.datasets() {
            let header = self.header.datasets.get(dataset.name).ok_or_else(|| {
                FormatError::CorruptContainer(format!("header lacks dataset {}", dataset.name))
            })?;
            if header.fields != dataset.describe() {
                return Err(FormatError::CorruptContainer(format!(
                    "dataset {} columns do not match version {}",
                    dataset.name, self.schema.version
                )));
            }
            let needed = header.rows * dataset.width() as u64;
            let actual = fs::metadata(dataset_path(&self.path, dataset))?.len();
            if actual < needed {
                return Err(FormatError::CorruptContainer(format!(
                    "{} holds {} bytes, header commits {}",
                    dataset.name, actual, needed
                )));
            }
        }
        Ok(())
    }

    fn write_rows(&self, batch: &EncodedBatch) -> Result<()> {
        self.write_dataset(&self.schema.packets, &batch.packets)?;
        if let Some(messages) = &self.schema.messages {
            self.write_dataset(messages, &batch.messages)?;
        }
        Ok(())
    }

    fn write_dataset(&self, dataset: &DatasetSchema, rows: &[Record]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut buf = Vec::with_capacity(rows.len() * dataset.width());
        for row in rows {
            row.write_to(&mut buf);
        }
        let offset = self.header.rows(dataset.name) * dataset.width() as u64;
        let mut file = OpenOptions::new()
            .write(true)
            .open(dataset_path(&self.path, dataset))?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&buf)?;
        file.sync_data()?;
        Ok(())
    }

    fn commit(&self, header: &ContainerHeader) -> Result<()> {
        let tmp = self.path.join(HEADER_TMP_FILE);
        let json = serde_json::to_vec_pretty(header)?;
        let mut file = File::create(&tmp)?;
        file.write_all(&json)?;
        file.sync_all()?;
        fs::rename(&tmp, self.path.join(HEADER_FILE))?;
        Ok(())
    }

    fn rollback(&self) {
        for dataset in self.datasets() {
            let committed = self.header.rows(dataset.name) * dataset.width() as u64;
            let result = OpenOptions::new()
                .write(true)
                .open(dataset_path(&self.path, dataset))
                .and_then(|f| f.set_len(committed));
            if let Err(e) = result {
                warn!("could not truncate {} after failed append: {}", dataset.name, e);
            }
        }
        match fs::remove_file(self.path.join(HEADER_TMP_FILE)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => {
                warn!("could not remove {} after failed append: {}", HEADER_TMP_FILE, e);
            }
            _ => {}
        }
    }
}

/// Lazy iterator over decoded packets of a container
pub struct PacketReader {
    file: BufReader<File>,
    dataset: &'static DatasetSchema,
    version: &'static str,
    messages: Option<MessageFile>,
    range: Range<u64>,
}

impl PacketReader {
    /// Rows left to read
    pub fn remaining(&self) -> u64 {
        self.range.end - self.range.start
    }

    fn next_packet(&mut self) -> Result<Packet> {
        let mut row = vec![0u8; self.dataset.width()];
        self.file.read_exact(&mut row)?;
        let record = Record::from_bytes(self.dataset, &row)?;
        match &mut self.messages {
            Some(messages) => codec::decode(&record, self.version, messages),
            None => codec::decode(&record, self.version, &mut NoMessages),
        }
    }
}

impl Iterator for PacketReader {
    type Item = Result<Packet>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.range.start >= self.range.end {
            return None;
        }
        self.range.start += 1;
        let item = self.next_packet();
        if item.is_err() {
            // Stop after the first failure; the file position is unreliable
            self.range.start = self.range.end;
        }
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = usize::try_from(self.remaining()).unwrap_or(usize::MAX);
        (n, Some(n))
    }
}

/// Random access to committed message rows
struct MessageFile {
    file: File,
    dataset: &'static DatasetSchema,
    count: u64,
}

impl MessageLookup for MessageFile {
    fn message(&mut self, index: u64) -> Result<String> {
        if index >= self.count {
            return Err(FormatError::MessageIndexOutOfRange {
                index,
                count: self.count,
            });
        }
        let mut row = vec![0u8; self.dataset.width()];
        self.file
            .seek(SeekFrom::Start(index * self.dataset.width() as u64))?;
        self.file.read_exact(&mut row)?;
        Ok(MessageRecord::from_record(&Record::from_bytes(self.dataset, &row)?).message)
    }
}

/// Lookup for versions without a message dataset
struct NoMessages;

impl MessageLookup for NoMessages {
    fn message(&mut self, index: u64) -> Result<String> {
        Err(FormatError::MessageIndexOutOfRange { index, count: 0 })
    }
}

fn writable_schema(version: &str) -> Result<&'static VersionSchema> {
    let schema = schema::schema(version)?;
    if !schema.writable {
        return Err(FormatError::ReadOnlyVersion(version.to_string()));
    }
    Ok(schema)
}

fn read_header(path: &Path) -> Result<ContainerHeader> {
    let header_path = path.join(HEADER_FILE);
    if !header_path.is_file() {
        return Err(FormatError::NotAContainer(path.to_path_buf()));
    }
    let bytes = fs::read(header_path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn dataset_path(container: &Path, dataset: &DatasetSchema) -> PathBuf {
    container.join(format!("{}.bin", dataset.name))
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Resolve slice-style bounds against a length
fn clamp_range(start: Option<i64>, end: Option<i64>, len: u64) -> Range<u64> {
    let len_i = i64::try_from(len).unwrap_or(i64::MAX);
    let resolve = |idx: i64| -> u64 {
        if idx < 0 {
            (len_i + idx).max(0) as u64
        } else {
            (idx as u64).min(len)
        }
    };
    let start = start.map_or(0, resolve);
    let end = end.map_or(len, resolve);
    start..end.max(start)
}
