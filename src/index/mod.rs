// Vector index module
// Persistent nearest-neighbour storage for embedded chunks


pub mod flat;
pub mod lance;

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::Config;
use crate::embeddings::{Chunk, ChunkingConfig, Embedder, chunk_documents};
use crate::loader::load_documents;
use crate::{RagError, Result};

pub use flat::FlatIndex;
pub use lance::LanceIndex;

pub const MANIFEST_FILE: &str = "manifest.json";

/// Storage engine behind a vector index
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackend {
    /// LanceDB table searched with cosine distance
    #[default]
    Lance,
    /// Exhaustive cosine scan over records kept in JSON
    Flat,
}

impl fmt::Display for IndexBackend {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lance => f.write_str("lance"),
            Self::Flat => f.write_str("flat"),
        }
    }
}

/// A chunk paired with its embedding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedChunk {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    /// Similarity to the query, higher is closer
    pub score: f32,
}

/// Ranked top-K hits for one query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetrievalResult {
    pub hits: Vec<ScoredChunk>,
}

impl RetrievalResult {
    #[inline]
    pub fn len(&self) -> usize {
        self.hits.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &ScoredChunk> {
        self.hits.iter()
    }

    /// Chunk texts in rank order
    #[inline]
    pub fn texts(&self) -> Vec<&str> {
        self.hits.iter().map(|hit| hit.chunk.text.as_str()).collect()
    }
}

/// Description of a persisted index, written next to its data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub backend: IndexBackend,
    pub embedding_model: String,
    pub dimension: usize,
    pub chunk_count: usize,
    pub chunking: ChunkingConfig,
    pub created_at: DateTime<Utc>,
}

impl IndexManifest {
    #[inline]
    pub fn read(dir: &Path) -> Result<Self> {
        let path = dir.join(MANIFEST_FILE);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(RagError::Config(format!(
                    "{} is not an index (missing {})",
                    dir.display(),
                    MANIFEST_FILE
                )));
            }
            Err(e) => return Err(e.into()),
        };

        serde_json::from_str(&content)
            .map_err(|e| RagError::Storage(format!("Invalid manifest {}: {}", path.display(), e)))
    }

    #[inline]
    pub fn write(&self, dir: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| RagError::Storage(format!("Failed to serialize manifest: {}", e)))?;
        write_synced(&dir.join(MANIFEST_FILE), content.as_bytes())
    }
}

/// A loaded, read-only index
#[async_trait]
pub trait VectorIndex: Send + Sync {
    fn manifest(&self) -> &IndexManifest;

    fn location(&self) -> &Path;

    #[inline]
    fn backend(&self) -> IndexBackend {
        self.manifest().backend
    }

    #[inline]
    fn len(&self) -> usize {
        self.manifest().chunk_count
    }

    #[inline]
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return at most `k` chunks ordered by descending similarity, ties by insertion order
    async fn query(&self, vector: &[f32], k: usize) -> Result<RetrievalResult>;
}

/// Settings for a single index build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOptions {
    pub backend: IndexBackend,
    /// Chunks embedded per request
    pub batch_size: usize,
    /// Recorded in the manifest
    pub chunking: ChunkingConfig,
}

impl BuildOptions {
    #[inline]
    pub fn from_config(config: &Config) -> Self {
        Self {
            backend: config.retrieval.backend,
            batch_size: config.ollama.batch_size as usize,
            chunking: config.chunking.clone(),
        }
    }
}

/// Seconds without a heartbeat after which a build lock counts as abandoned
pub const STALE_LOCK_SECS: i64 = 600;

/// Contents of a build lock file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    pub pid: u32,
    /// Identifies the holder when several builds share a process
    pub token: uuid::Uuid,
    /// Refreshed after every embedding batch
    pub heartbeat: DateTime<Utc>,
}

impl LockInfo {
    fn current(token: uuid::Uuid) -> Self {
        Self {
            pid: std::process::id(),
            token,
            heartbeat: Utc::now(),
        }
    }

    /// Read the lock guarding `location`, if one exists.
    ///
    /// A lock file that cannot be parsed (for example one whose holder died
    /// before writing it) is reported with the file's modification time as its
    /// heartbeat and a nil token.
    #[inline]
    pub fn read(location: &Path) -> Result<Option<Self>> {
        Self::read_file(&lock_path(location))
    }

    fn read_file(path: &Path) -> Result<Option<Self>> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if let Ok(info) = serde_json::from_str(&content) {
            return Ok(Some(info));
        }

        let modified = match fs::metadata(path).and_then(|meta| meta.modified()) {
            Ok(modified) => modified,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(Self {
            pid: 0,
            token: uuid::Uuid::nil(),
            heartbeat: DateTime::<Utc>::from(modified),
        }))
    }

    #[inline]
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.heartbeat).num_seconds() >= STALE_LOCK_SECS
    }
}

/// Exclusive claim on an index location, released on drop
#[derive(Debug)]
struct BuildLock {
    path: PathBuf,
    location: PathBuf,
    token: uuid::Uuid,
}

impl BuildLock {
    /// Claim `location`, reclaiming a lock whose holder stopped sending heartbeats
    fn acquire(location: &Path) -> Result<Self> {
        let path = lock_path(location);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        if let Some(lock) = Self::try_create(&path, location)? {
            return Ok(lock);
        }

        match LockInfo::read_file(&path)? {
            // Released between the attempt and the read
            None => Self::try_create(&path, location)?
                .ok_or_else(|| RagError::IndexLocked(location.to_path_buf())),
            Some(info) if info.is_stale(Utc::now()) => {
                warn!(
                    "Reclaiming abandoned build lock {} (pid {}, last heartbeat {})",
                    path.display(),
                    info.pid,
                    info.heartbeat.to_rfc3339()
                );
                match fs::remove_file(&path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
                Self::try_create(&path, location)?
                    .ok_or_else(|| RagError::IndexLocked(location.to_path_buf()))
            }
            Some(_) => Err(RagError::IndexLocked(location.to_path_buf())),
        }
    }

    fn try_create(path: &Path, location: &Path) -> Result<Option<Self>> {
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => {
                let token = uuid::Uuid::new_v4();
                if let Err(e) = write_lock_info(file, token) {
                    let _ = fs::remove_file(path);
                    return Err(e);
                }
                debug!("Acquired build lock {}", path.display());
                Ok(Some(Self {
                    path: path.to_path_buf(),
                    location: location.to_path_buf(),
                    token,
                }))
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn is_held(&self) -> Result<bool> {
        Ok(LockInfo::read_file(&self.path)?.is_some_and(|info| info.token == self.token))
    }

    /// Refresh the heartbeat; fails if another build reclaimed the lock meanwhile
    fn heartbeat(&self) -> Result<()> {
        if !self.is_held()? {
            return Err(RagError::IndexLocked(self.location.clone()));
        }
        let file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        write_lock_info(file, self.token)
    }
}

fn write_lock_info(mut file: File, token: uuid::Uuid) -> Result<()> {
    let content = serde_json::to_vec(&LockInfo::current(token))
        .map_err(|e| RagError::Storage(format!("Failed to serialize build lock: {}", e)))?;
    file.write_all(&content)?;
    Ok(())
}

impl Drop for BuildLock {
    fn drop(&mut self) {
        match self.is_held() {
            Ok(true) => {
                if let Err(e) = fs::remove_file(&self.path) {
                    warn!("Failed to release build lock {}: {}", self.path.display(), e);
                }
            }
            Ok(false) => warn!(
                "Build lock {} was reclaimed by another build, leaving it in place",
                self.path.display()
            ),
            Err(e) => warn!("Failed to read build lock {}: {}", self.path.display(), e),
        }
    }
}

/// Path of the lock file guarding `location`
#[inline]
pub fn lock_path(location: &Path) -> PathBuf {
    let normalized: PathBuf = location.components().collect();
    let mut path = normalized.into_os_string();
    path.push(".lock");
    PathBuf::from(path)
}

/// Whether `location` holds any persisted data
#[inline]
pub fn is_populated(location: &Path) -> bool {
    fs::read_dir(location).is_ok_and(|mut entries| entries.next().is_some())
}

fn staging_path(location: &Path) -> Result<PathBuf> {
    let name = location.file_name().ok_or_else(|| {
        RagError::InvalidInput(format!(
            "Index location {} has no directory name",
            location.display()
        ))
    })?;
    let staging = format!(
        ".{}.staging-{}",
        name.to_string_lossy(),
        uuid::Uuid::new_v4()
    );
    Ok(location.with_file_name(staging))
}

/// Staging directories of builds that never published
fn leftover_staging(location: &Path) -> Result<Vec<PathBuf>> {
    let Some(name) = location.file_name() else {
        return Ok(Vec::new());
    };
    let prefix = format!(".{}.staging-", name.to_string_lossy());
    let parent = parent_dir(location);

    let entries = match fs::read_dir(parent) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut found = Vec::new();
    for entry in entries {
        let entry = entry?;
        if entry.file_name().to_string_lossy().starts_with(&prefix) {
            found.push(entry.path());
        }
    }
    found.sort();
    Ok(found)
}

fn parent_dir(location: &Path) -> &Path {
    location
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Write `content` to `path` and flush it to disk before returning
#[inline]
pub fn write_synced(path: &Path, content: &[u8]) -> Result<()> {
    let mut file = File::create(path)?;
    file.write_all(content)?;
    file.sync_all()?;
    Ok(())
}

/// Flush a directory's entries so renames and creations inside it survive a crash
#[cfg(unix)]
fn sync_dir(path: &Path) -> Result<()> {
    File::open(path)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_dir(_path: &Path) -> Result<()> {
    Ok(())
}

/// Flush every file and directory below `root`
fn sync_tree(root: &Path) -> Result<()> {
    for entry in WalkDir::new(root).contents_first(true) {
        let entry = entry.map_err(|e| {
            RagError::Storage(format!("Failed to walk {}: {}", root.display(), e))
        })?;
        if entry.file_type().is_dir() {
            sync_dir(entry.path())?;
        } else {
            File::open(entry.path())?.sync_all()?;
        }
    }
    Ok(())
}

fn embedding_progress(total: usize) -> ProgressBar {
    if console::user_attended_stderr() {
        ProgressBar::new(total as u64).with_style(
            ProgressStyle::with_template("{bar:40} [{pos}/{len}] Embedding chunks")
                .expect("style template is valid"),
        )
    } else {
        ProgressBar::hidden()
    }
}

/// Embed every chunk, in order, checking counts and dimensions
fn embed_chunks(
    chunks: &[Chunk],
    embedder: &dyn Embedder,
    batch_size: usize,
    lock: &BuildLock,
) -> Result<Vec<IndexedChunk>> {
    let bar = embedding_progress(chunks.len());
    let mut records = Vec::with_capacity(chunks.len());
    let mut dimension = None;

    for batch in chunks.chunks(batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|chunk| chunk.text.clone()).collect();
        let vectors = embedder.embed_batch(&texts)?;

        if vectors.len() != batch.len() {
            return Err(RagError::Embedding(format!(
                "Expected {} vectors, received {}",
                batch.len(),
                vectors.len()
            )));
        }

        for (chunk, vector) in batch.iter().zip(vectors) {
            let expected = *dimension.get_or_insert(vector.len());
            if vector.is_empty() || vector.len() != expected {
                return Err(RagError::Embedding(format!(
                    "Inconsistent embedding dimension for chunk {} of {}: expected {}, got {}",
                    chunk.sequence,
                    chunk.source_id,
                    expected,
                    vector.len()
                )));
            }
            records.push(IndexedChunk {
                chunk: chunk.clone(),
                vector,
            });
        }

        bar.inc(batch.len() as u64);
        lock.heartbeat()?;
    }

    bar.finish_and_clear();
    Ok(records)
}

/// Embed `chunks` and persist them as a new index at `location`.
///
/// The data is written to a sibling staging directory and renamed into place,
/// so a reader never observes a half-written index.
#[inline]
pub async fn build_index(
    location: &Path,
    chunks: &[Chunk],
    embedder: &dyn Embedder,
    options: &BuildOptions,
) -> Result<Box<dyn VectorIndex>> {
    if chunks.is_empty() {
        return Err(RagError::EmptyInput);
    }
    if is_populated(location) {
        return Err(RagError::IndexExists(location.to_path_buf()));
    }

    let lock = BuildLock::acquire(location)?;
    // Another builder may have published between the check and the claim
    if is_populated(location) {
        return Err(RagError::IndexExists(location.to_path_buf()));
    }

    for leftover in leftover_staging(location)? {
        warn!("Removing unfinished build {}", leftover.display());
        fs::remove_dir_all(&leftover)?;
    }

    info!(
        "Building {} index at {} from {} chunks",
        options.backend,
        location.display(),
        chunks.len()
    );

    let records = embed_chunks(chunks, embedder, options.batch_size, &lock)?;
    let dimension = records.first().map_or(0, |record| record.vector.len());

    let manifest = IndexManifest {
        backend: options.backend,
        embedding_model: embedder.model().to_string(),
        dimension,
        chunk_count: records.len(),
        chunking: options.chunking.clone(),
        created_at: Utc::now(),
    };

    let staging = staging_path(location)?;
    fs::create_dir_all(&staging)?;
    if let Err(e) = write_staged(&staging, &records, &manifest).await {
        remove_staging(&staging);
        return Err(e);
    }

    if location.exists() {
        // An empty directory left behind by a reset or a user
        fs::remove_dir(location)?;
    }
    if let Err(e) = fs::rename(&staging, location) {
        remove_staging(&staging);
        return Err(e.into());
    }
    sync_dir(parent_dir(location))?;
    drop(lock);

    info!(
        "Published index at {} ({} chunks, dimension {})",
        location.display(),
        manifest.chunk_count,
        manifest.dimension
    );

    load_index(manifest.backend, location).await
}

async fn write_staged(
    staging: &Path,
    records: &[IndexedChunk],
    manifest: &IndexManifest,
) -> Result<()> {
    match manifest.backend {
        IndexBackend::Lance => {
            lance::write_records(staging, records).await?;
            sync_tree(&staging.join(lance::DATA_DIR))?;
        }
        IndexBackend::Flat => flat::write_records(staging, records)?,
    }
    manifest.write(staging)?;
    sync_dir(staging)
}

fn remove_staging(staging: &Path) {
    if let Err(e) = fs::remove_dir_all(staging) {
        warn!(
            "Failed to remove staging directory {}: {}",
            staging.display(),
            e
        );
    }
}

/// Open a persisted index without embedding anything
#[inline]
pub async fn load_index(backend: IndexBackend, location: &Path) -> Result<Box<dyn VectorIndex>> {
    if !is_populated(location) {
        return Err(RagError::IndexNotFound(location.to_path_buf()));
    }

    let manifest = IndexManifest::read(location)?;
    if manifest.backend != backend {
        return Err(RagError::Config(format!(
            "Index at {} was built with the {} backend but {} is configured",
            location.display(),
            manifest.backend,
            backend
        )));
    }

    debug!(
        "Loading {} index at {} ({} chunks)",
        backend,
        location.display(),
        manifest.chunk_count
    );

    let index: Box<dyn VectorIndex> = match backend {
        IndexBackend::Lance => Box::new(LanceIndex::open(location, manifest).await?),
        IndexBackend::Flat => Box::new(FlatIndex::open(location, manifest)?),
    };
    Ok(index)
}

/// Load the configured index, building it from the document folder when absent
#[inline]
pub async fn open_or_build(config: &Config, embedder: &dyn Embedder) -> Result<Box<dyn VectorIndex>> {
    let location = config.index_path();
    let backend = config.retrieval.backend;

    if is_populated(location) {
        let index = load_index(backend, location).await?;
        warn_on_model_mismatch(index.manifest(), embedder);
        info!(
            "Loaded existing index at {} ({} chunks)",
            location.display(),
            index.len()
        );
        return Ok(index);
    }

    let docs_folder = config.docs_folder();
    info!("No index at {}, ingesting {}", location.display(), docs_folder.display());

    let report = load_documents(docs_folder);
    for failure in &report.failures {
        warn!("Skipped {}", failure);
    }
    if report.is_empty() {
        return Err(RagError::EmptyCorpus(docs_folder.to_path_buf()));
    }

    let chunks = chunk_documents(&report.documents, &config.chunking)?;
    info!(
        "Split {} documents into {} chunks",
        report.len(),
        chunks.len()
    );

    match build_index(location, &chunks, embedder, &BuildOptions::from_config(config)).await {
        Err(RagError::IndexExists(_)) => {
            info!("Index at {} was published concurrently, loading it", location.display());
            load_index(backend, location).await
        }
        result => result,
    }
}

fn warn_on_model_mismatch(manifest: &IndexManifest, embedder: &dyn Embedder) {
    if manifest.embedding_model != embedder.model() {
        warn!(
            "Index was built with embedding model {} but {} is configured; rebuild the index with `index --rebuild`",
            manifest.embedding_model,
            embedder.model()
        );
    }
}

/// Delete the index at `location` together with any unfinished build: leftover
/// staging directories and the build lock. Returns whether anything was removed.
///
/// Must not run while another build is in progress.
#[inline]
pub fn reset_index(location: &Path) -> Result<bool> {
    let mut removed = false;

    match fs::remove_dir_all(location) {
        Ok(()) => {
            info!("Removed index at {}", location.display());
            removed = true;
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    for leftover in leftover_staging(location)? {
        fs::remove_dir_all(&leftover)?;
        info!("Removed unfinished build {}", leftover.display());
        removed = true;
    }

    let lock = lock_path(location);
    match fs::remove_file(&lock) {
        Ok(()) => {
            warn!("Removed build lock {}", lock.display());
            removed = true;
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    Ok(removed)
}

/// Reject a zero `k` before touching storage
#[inline]
pub fn validate_k(k: usize) -> Result<()> {
    if k == 0 {
        return Err(RagError::InvalidInput(
            "k must be at least 1".to_string(),
        ));
    }
    Ok(())
}

/// Check the query vector against the indexed dimension
#[inline]
pub fn validate_dimension(manifest: &IndexManifest, vector: &[f32]) -> Result<()> {
    if vector.len() != manifest.dimension {
        return Err(RagError::Retrieval(format!(
            "Query vector has dimension {}, index expects {}",
            vector.len(),
            manifest.dimension
        )));
    }
    Ok(())
}

/// Cosine similarity; zero when either vector has no magnitude
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0_f32;
    let mut norm_a = 0.0_f32;
    let mut norm_b = 0.0_f32;
    for (x, y) in a.iter().zip(b) {
        dot = x.mul_add(*y, dot);
        norm_a = x.mul_add(*x, norm_a);
        norm_b = y.mul_add(*y, norm_b);
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Order hits by descending score, then by insertion position, and keep `k`
#[inline]
pub fn rank_hits(mut hits: Vec<(usize, ScoredChunk)>, k: usize) -> RetrievalResult {
    hits.sort_by(|(pos_a, a), (pos_b, b)| b.score.total_cmp(&a.score).then(pos_a.cmp(pos_b)));
    hits.truncate(k);
    RetrievalResult {
        hits: hits.into_iter().map(|(_, hit)| hit).collect(),
    }
}
