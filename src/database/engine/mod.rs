
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Once};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use sqlx::SqlitePool;
use sqlx::migrate::MigrateError;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tokio::fs;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::database::repository::VectorRepository;
use crate::scheduler::Scheduler;
use crate::{Result, VaultError};

/// Every valid SQLite database file starts with this header
const SQLITE_HEADER: &[u8] = b"SQLite format 3\0";

/// Failure strings the engine reports when it cannot run in this build at all
const RUNTIME_OUTDATED_MARKERS: &[&str] = &[
    "aborted()",
    "no such function: vec_",
    "no such module: vec0",
];

/// Owns the embedded engine: the live database file, its connection pool and the
/// compressed snapshot it is restored from and saved to.
pub struct DatabaseManager {
    pool: SqlitePool,
    repository: VectorRepository,
    snapshot_path: PathBuf,
    working_path: PathBuf,
    scheduler: Arc<dyn Scheduler>,
}

impl DatabaseManager {
    /// Load the engine from the configured snapshot, or start an empty one
    #[inline]
    pub async fn create(config: &Config, scheduler: Arc<dyn Scheduler>) -> Result<Self> {
        Self::open(
            config.snapshot_path(),
            config.working_database_path(),
            scheduler,
        )
        .await
    }

    /// Restore `snapshot_path` into `working_path` and bring its schema up to date.
    ///
    /// A missing or unreadable snapshot yields a fresh, empty engine. A snapshot written by a
    /// newer build, or an engine without the vector extension, fails with
    /// [`VaultError::RuntimeOutdated`].
    #[inline]
    pub async fn open(
        snapshot_path: PathBuf,
        working_path: PathBuf,
        scheduler: Arc<dyn Scheduler>,
    ) -> Result<Self> {
        register_vector_extension();

        if let Some(parent) = working_path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                VaultError::Database(format!("Failed to create engine directory: {}", e))
            })?;
        }

        let pool = match restore_snapshot(&snapshot_path, &working_path).await {
            Ok(true) => match connect(&working_path).await {
                Ok(pool) => {
                    info!("Restored index from {}", snapshot_path.display());
                    pool
                }
                Err(e) if is_runtime_outdated(&e) => {
                    return Err(VaultError::RuntimeOutdated(e));
                }
                Err(e) => {
                    warn!(
                        "Snapshot {} could not be opened, starting a new index: {}",
                        snapshot_path.display(),
                        e
                    );
                    back_up_unreadable_snapshot(&snapshot_path).await;
                    create_fresh(&working_path).await?
                }
            },
            Ok(false) => {
                info!(
                    "No snapshot at {}, creating a new index",
                    snapshot_path.display()
                );
                create_fresh(&working_path).await?
            }
            Err(e) => {
                warn!(
                    "Snapshot {} is unreadable, starting a new index: {}",
                    snapshot_path.display(),
                    e
                );
                back_up_unreadable_snapshot(&snapshot_path).await;
                create_fresh(&working_path).await?
            }
        };

        run_migrations(&pool).await?;
        verify_vector_extension(&pool).await?;

        Ok(Self {
            repository: VectorRepository::new(pool.clone()),
            pool,
            snapshot_path,
            working_path,
            scheduler,
        })
    }

    #[inline]
    pub fn repository(&self) -> &VectorRepository {
        &self.repository
    }

    #[inline]
    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    /// Highest applied migration version
    #[inline]
    pub async fn schema_version(&self) -> Result<Option<i64>> {
        sqlx::query_scalar("SELECT MAX(version) FROM _sqlx_migrations WHERE success = 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| VaultError::Database(format!("Failed to read schema version: {}", e)))
    }

    /// Write the live engine to the snapshot. Failures are logged and never returned.
    #[inline]
    pub async fn save(&self) {
        if let Err(e) = self.try_save().await {
            error!(
                "Failed to save index snapshot to {}: {}",
                self.snapshot_path.display(),
                e
            );
        }
    }

    /// Dump, compress and atomically replace the snapshot.
    ///
    /// Yields to the scheduler before dumping, after dumping and before writing.
    #[inline]
    pub async fn try_save(&self) -> Result<()> {
        if self.pool.is_closed() {
            debug!("Engine is closed, skipping save");
            return Ok(());
        }

        self.scheduler.yield_now().await;

        let dump_path = self.working_path.with_extension("dump");
        remove_if_exists(&dump_path).await?;

        sqlx::query("VACUUM INTO ?")
            .bind(dump_path.to_string_lossy().into_owned())
            .execute(&self.pool)
            .await
            .map_err(|e| VaultError::Database(format!("Failed to dump engine: {}", e)))?;

        self.scheduler.yield_now().await;

        let compress_path = dump_path.clone();
        let compressed = tokio::task::spawn_blocking(move || compress_file(&compress_path))
            .await
            .map_err(|e| VaultError::Database(format!("Snapshot compression panicked: {}", e)))??;
        remove_if_exists(&dump_path).await?;

        self.scheduler.yield_now().await;

        write_atomically(&self.snapshot_path, &compressed).await?;

        debug!(
            "Saved {} byte snapshot to {}",
            compressed.len(),
            self.snapshot_path.display()
        );
        Ok(())
    }

    /// Reclaim space left by deleted rows. Does nothing once the engine is closed.
    #[inline]
    pub async fn vacuum(&self) -> Result<()> {
        if self.pool.is_closed() {
            debug!("Engine is closed, skipping vacuum");
            return Ok(());
        }

        info!("Vacuuming index database");

        sqlx::query("VACUUM")
            .execute(&self.pool)
            .await
            .map_err(|e| VaultError::Database(format!("Failed to vacuum database: {}", e)))?;

        sqlx::query("ANALYZE")
            .execute(&self.pool)
            .await
            .map_err(|e| VaultError::Database(format!("Failed to analyze database: {}", e)))?;

        Ok(())
    }

    /// Save, then close the engine and drop the working copy. Safe to call more than once.
    #[inline]
    pub async fn cleanup(&self) {
        if self.pool.is_closed() {
            return;
        }

        self.save().await;
        self.pool.close().await;

        for path in working_files(&self.working_path) {
            if let Err(e) = remove_if_exists(&path).await {
                warn!("Failed to remove {}: {}", path.display(), e);
            }
        }

        info!("Index database closed");
    }
}

/// Register sqlite-vec for every connection opened afterwards in this process
fn register_vector_extension() {
    static REGISTER: Once = Once::new();

    REGISTER.call_once(|| {
        // SAFETY: `sqlite3_vec_init` is the extension entry point exported by sqlite-vec and
        // has the signature `sqlite3_auto_extension` expects; the transmute only erases the
        // concrete pointer type across the FFI boundary.
        let rc = unsafe {
            libsqlite3_sys::sqlite3_auto_extension(Some(std::mem::transmute(
                sqlite_vec::sqlite3_vec_init as *const (),
            )))
        };
        if rc != libsqlite3_sys::SQLITE_OK {
            error!("Failed to register the sqlite-vec extension (code {})", rc);
        }
    });
}

async fn connect(path: &Path) -> std::result::Result<SqlitePool, String> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .map_err(|e| e.to_string())?;

    // Opening is lazy; reading the schema surfaces "file is not a database"
    sqlx::query("SELECT COUNT(*) FROM sqlite_master")
        .execute(&pool)
        .await
        .map_err(|e| e.to_string())?;

    Ok(pool)
}

async fn create_fresh(working_path: &Path) -> Result<SqlitePool> {
    for path in working_files(working_path) {
        remove_if_exists(&path).await?;
    }

    connect(working_path).await.map_err(|e| {
        if is_runtime_outdated(&e) {
            VaultError::RuntimeOutdated(e)
        } else {
            VaultError::Database(format!("Failed to create index database: {}", e))
        }
    })
}

async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    info!("Running database migrations");

    sqlx::migrate!("src/database/migrations")
        .run(pool)
        .await
        .map_err(|e| match e {
            MigrateError::VersionMissing(version) => VaultError::RuntimeOutdated(format!(
                "the index was written with schema version {} which this build does not know",
                version
            )),
            other => {
                let message = other.to_string();
                if is_runtime_outdated(&message) {
                    VaultError::RuntimeOutdated(message)
                } else {
                    VaultError::Database(format!("Failed to run schema migration: {}", message))
                }
            }
        })?;

    debug!("Database migrations completed successfully");
    Ok(())
}

async fn verify_vector_extension(pool: &SqlitePool) -> Result<()> {
    let version: String = sqlx::query_scalar("SELECT vec_version()")
        .fetch_one(pool)
        .await
        .map_err(|e| VaultError::RuntimeOutdated(e.to_string()))?;

    debug!("sqlite-vec {} available", version);
    Ok(())
}

fn is_runtime_outdated(message: &str) -> bool {
    let message = message.to_lowercase();
    RUNTIME_OUTDATED_MARKERS
        .iter()
        .any(|marker| message.contains(marker))
}

/// Decompress the snapshot into the working file. `Ok(false)` when there is no snapshot.
async fn restore_snapshot(snapshot_path: &Path, working_path: &Path) -> Result<bool> {
    let compressed = match fs::read(snapshot_path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    };

    let database = tokio::task::spawn_blocking(move || decompress(&compressed))
        .await
        .map_err(|e| VaultError::Database(format!("Snapshot decompression panicked: {}", e)))??;

    if !database.starts_with(SQLITE_HEADER) {
        return Err(VaultError::Database(
            "snapshot does not contain a database".to_string(),
        ));
    }

    for path in working_files(working_path) {
        remove_if_exists(&path).await?;
    }
    fs::write(working_path, &database).await?;

    Ok(true)
}

/// Keep an unreadable snapshot next to the new one instead of overwriting it on the next save
async fn back_up_unreadable_snapshot(snapshot_path: &Path) {
    let backup_path = snapshot_path.with_extension("corrupted_backup");
    match fs::rename(snapshot_path, &backup_path).await {
        Ok(()) => info!("Unreadable snapshot backed up to {}", backup_path.display()),
        Err(e) => error!("Failed to back up unreadable snapshot: {}", e),
    }
}

fn decompress(compressed: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(compressed);
    let mut database = Vec::new();
    decoder
        .read_to_end(&mut database)
        .map_err(|e| VaultError::Database(format!("Failed to decompress snapshot: {}", e)))?;
    Ok(database)
}

fn compress_file(path: &Path) -> Result<Vec<u8>> {
    let database = std::fs::read(path)?;
    let mut encoder = GzEncoder::new(Vec::with_capacity(database.len() / 2), Compression::fast());
    encoder.write_all(&database)?;
    Ok(encoder.finish()?)
}

/// Write to a sibling temp file, then rename over the target
async fn write_atomically(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let mut temp_name = path.as_os_str().to_owned();
    temp_name.push(".tmp");
    let temp_path = PathBuf::from(temp_name);

    fs::write(&temp_path, contents).await?;
    fs::rename(&temp_path, path).await?;
    Ok(())
}

async fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// The database file plus the journal files SQLite may leave next to it
fn working_files(working_path: &Path) -> Vec<PathBuf> {
    ["", "-journal", "-wal", "-shm"]
        .iter()
        .map(|suffix| {
            let mut name = working_path.as_os_str().to_owned();
            name.push(suffix);
            PathBuf::from(name)
        })
        .collect()
}
