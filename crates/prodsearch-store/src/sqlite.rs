//! SQLite-based storage implementation.

use std::path::Path;
use std::sync::{Mutex, Once};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use tracing::{debug, info, warn};

use prodsearch_core::{
    validate_batch, validate_query, BackendKind, Candidate, IndexedVector, ProductId,
    ProductMetadata, Result, SearchError, SqliteConfig, VectorStore,
};

use crate::schema::{vec_schema, SCHEMA, SCHEMA_VERSION};

/// Largest `k` a vec0 KNN query accepts.
const MAX_KNN: usize = 4096;

const BACKEND: &str = "sqlite";

/// SQLite store: a `products` table joined to a sqlite-vec `vec0` index.
///
/// The connection sits behind a blocking Mutex; every statement runs
/// inside a `with_conn` closure.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    dimension: usize,
}

impl SqliteStore {
    /// Open or create a database at the given path with default pragmas.
    pub fn open(path: impl AsRef<Path>, dimension: usize) -> Result<Self> {
        let config = SqliteConfig {
            path: path.as_ref().to_path_buf(),
            ..Default::default()
        };
        Self::open_with_config(&config, dimension)
    }

    /// Open or create the database described by `config`.
    pub fn open_with_config(config: &SqliteConfig, dimension: usize) -> Result<Self> {
        let path = config.path.as_path();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        register_vec_extension();

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| SearchError::unavailable(BACKEND, format!("Failed to open database: {}", e)))?;

        Self::configure_connection(&conn, config)?;
        Self::init(conn, dimension, path)
    }

    /// Open an in-memory database (for testing).
    pub fn open_memory(dimension: usize) -> Result<Self> {
        register_vec_extension();

        let conn = Connection::open_in_memory().map_err(|e| {
            SearchError::unavailable(BACKEND, format!("Failed to open in-memory database: {}", e))
        })?;

        Self::init(conn, dimension, Path::new(":memory:"))
    }

    fn init(conn: Connection, dimension: usize, path: &Path) -> Result<Self> {
        conn.execute_batch(SCHEMA)
            .map_err(|e| SearchError::database(format!("Failed to initialize schema: {}", e)))?;

        if !Self::vec_available(&conn) && !Self::try_load_vec_extension(&conn) {
            return Err(SearchError::unavailable(
                BACKEND,
                "sqlite-vec extension not available",
            ));
        }

        Self::check_dimension(&conn, dimension)?;

        conn.execute_batch(&vec_schema(dimension))
            .map_err(|e| SearchError::database(format!("Failed to create vec table: {}", e)))?;

        info!("Database opened at {:?} (dimension {})", path, dimension);

        Ok(Self {
            conn: Mutex::new(conn),
            dimension,
        })
    }

    fn configure_connection(conn: &Connection, config: &SqliteConfig) -> Result<()> {
        conn.execute_batch(&format!(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = {};
            PRAGMA busy_timeout = {};
            PRAGMA temp_store = MEMORY;
            "#,
            config.cache_size, config.busy_timeout_ms
        ))
        .map_err(|e| SearchError::database(format!("Failed to configure connection: {}", e)))?;

        Ok(())
    }

    fn vec_available(conn: &Connection) -> bool {
        conn.query_row("SELECT vec_version()", [], |row| row.get::<_, String>(0))
            .map(|version| debug!("sqlite-vec {} linked", version))
            .is_ok()
    }

    /// Fall back to a system-installed sqlite-vec build.
    fn try_load_vec_extension(conn: &Connection) -> bool {
        let paths = [
            "vec0",
            "libsqlite_vec",
            "/usr/local/lib/libsqlite_vec",
            "/opt/homebrew/lib/libsqlite_vec",
        ];

        unsafe {
            if conn.load_extension_enable().is_err() {
                return false;
            }

            for path in paths {
                if conn.load_extension(path, None::<&str>).is_ok() {
                    let _ = conn.load_extension_disable();
                    info!("sqlite-vec loaded from {}", path);
                    return true;
                }
            }

            let _ = conn.load_extension_disable();
        }

        warn!("sqlite-vec could not be loaded from any known path");
        false
    }

    /// Record the dimension on first open; refuse a mismatched reopen.
    fn check_dimension(conn: &Connection, dimension: usize) -> Result<()> {
        let stored: Option<String> = conn
            .query_row(
                "SELECT value FROM store_meta WHERE key = 'dimension'",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| SearchError::database(e.to_string()))?;

        match stored {
            Some(value) if value != dimension.to_string() => Err(SearchError::config(format!(
                "database was created with dimension {}, configured dimension is {}",
                value, dimension
            ))),
            Some(_) => Ok(()),
            None => {
                conn.execute(
                    "INSERT INTO store_meta (key, value) VALUES ('dimension', ?1), ('schema_version', ?2)",
                    params![dimension.to_string(), SCHEMA_VERSION.to_string()],
                )
                .map_err(|e| SearchError::database(e.to_string()))?;
                Ok(())
            }
        }
    }

    /// Execute a blocking operation on the connection.
    fn with_conn<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| SearchError::database(e.to_string()))?;
        f(&conn)
    }

    fn row_to_metadata(row: &Row) -> rusqlite::Result<ProductMetadata> {
        Ok(ProductMetadata {
            id: Some(row.get(0)?),
            category: row.get(1)?,
            title: row.get(2)?,
            description: row.get(3)?,
            price: row.get(4)?,
            url: row.get(5)?,
        })
    }

    /// Convert f32 vector to bytes (little-endian).
    fn vec_to_bytes(v: &[f32]) -> Vec<u8> {
        v.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    fn bytes_to_vec(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }
}

/// Link the bundled sqlite-vec into every connection opened afterwards.
fn register_vec_extension() {
    static REGISTER: Once = Once::new();
    REGISTER.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite_vec::sqlite3_vec_init as *const (),
        )));
    });
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[async_trait]
impl VectorStore for SqliteStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn add(
        &self,
        vectors: &[Vec<f32>],
        metadata: &[ProductMetadata],
        ids: &[ProductId],
    ) -> Result<()> {
        validate_batch(self.dimension, vectors, metadata, ids)?;
        let now = unix_now();

        self.with_conn(|conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(|e| SearchError::database(e.to_string()))?;

            {
                let mut upsert_row = tx
                    .prepare(
                        r#"
                        INSERT INTO products (id, category, title, description, price, url, updated_at)
                        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                        ON CONFLICT(id) DO UPDATE SET
                            category = excluded.category,
                            title = excluded.title,
                            description = excluded.description,
                            price = excluded.price,
                            url = excluded.url,
                            updated_at = excluded.updated_at
                        "#,
                    )
                    .map_err(|e| SearchError::database(e.to_string()))?;
                let mut delete_vec = tx
                    .prepare("DELETE FROM vec_products WHERE product_id = ?1")
                    .map_err(|e| SearchError::database(e.to_string()))?;
                let mut insert_vec = tx
                    .prepare("INSERT INTO vec_products (product_id, embedding) VALUES (?1, ?2)")
                    .map_err(|e| SearchError::database(e.to_string()))?;

                for ((vector, md), id) in vectors.iter().zip(metadata).zip(ids) {
                    upsert_row
                        .execute(params![
                            id,
                            md.category,
                            md.title,
                            md.description,
                            md.price,
                            md.url,
                            now,
                        ])
                        .map_err(|e| SearchError::database(format!("Failed to upsert product {}: {}", id, e)))?;

                    // vec0 has no upsert.
                    delete_vec
                        .execute(params![id])
                        .map_err(|e| SearchError::database(e.to_string()))?;
                    insert_vec
                        .execute(params![id, Self::vec_to_bytes(vector)])
                        .map_err(|e| SearchError::database(format!("Failed to insert embedding: {}", e)))?;
                }
            }

            tx.commit()
                .map_err(|e| SearchError::database(e.to_string()))?;

            info!("Upserted {} embeddings into sqlite", ids.len());
            Ok(())
        })
    }

    fn search_limit(&self) -> Option<usize> {
        Some(MAX_KNN)
    }

    async fn search(&self, vector: &[f32], k: usize) -> Result<Vec<Candidate>> {
        validate_query(self.dimension, vector)?;
        if k == 0 {
            return Ok(Vec::new());
        }
        if k > MAX_KNN {
            debug!("Clamping KNN k from {} to {}", k, MAX_KNN);
        }
        let k = k.min(MAX_KNN) as i64;
        let embedding_bytes = Self::vec_to_bytes(vector);

        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    r#"
                    WITH knn AS (
                        SELECT product_id, distance
                        FROM vec_products
                        WHERE embedding MATCH ?1 AND k = ?2
                    )
                    SELECT p.id, p.category, p.title, p.description, p.price, p.url, knn.distance
                    FROM knn
                    JOIN products p ON p.id = knn.product_id
                    ORDER BY knn.distance
                    "#,
                )
                .map_err(|e| SearchError::database(e.to_string()))?;

            let rows = stmt
                .query_map(params![embedding_bytes, k], |row| {
                    let distance: f64 = row.get(6)?;
                    Ok(Candidate {
                        id: row.get(0)?,
                        similarity: 1.0 - distance as f32,
                        metadata: Self::row_to_metadata(row)?,
                    })
                })
                .map_err(|e| SearchError::database(e.to_string()))?;

            rows.collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| SearchError::database(e.to_string()))
        })
    }

    async fn fetch(&self, id: ProductId) -> Result<Option<IndexedVector>> {
        self.with_conn(|conn| {
            let metadata = conn
                .query_row(
                    "SELECT id, category, title, description, price, url FROM products WHERE id = ?1",
                    params![id],
                    Self::row_to_metadata,
                )
                .optional()
                .map_err(|e| SearchError::database(e.to_string()))?;

            let Some(metadata) = metadata else {
                return Ok(None);
            };

            let embedding: Option<Vec<u8>> = conn
                .query_row(
                    "SELECT embedding FROM vec_products WHERE product_id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| SearchError::database(e.to_string()))?;

            Ok(embedding.map(|bytes| IndexedVector {
                id,
                embedding: Self::bytes_to_vec(&bytes),
                metadata,
            }))
        })
    }

    async fn list_metadata(&self) -> Result<Vec<(ProductId, ProductMetadata)>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT id, category, title, description, price, url FROM products ORDER BY id")
                .map_err(|e| SearchError::database(e.to_string()))?;

            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, ProductId>(0)?, Self::row_to_metadata(row)?)))
                .map_err(|e| SearchError::database(e.to_string()))?;

            rows.collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| SearchError::database(e.to_string()))
        })
    }

    async fn count(&self) -> Result<usize> {
        self.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM products", [], |row| row.get(0))
                .map_err(|e| SearchError::database(e.to_string()))?;
            Ok(count as usize)
        })
    }

    async fn close(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute_batch("PRAGMA optimize;")
                .map_err(|e| SearchError::database(e.to_string()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn md(id: ProductId, title: &str, price: f64) -> ProductMetadata {
        ProductMetadata {
            id: Some(id),
            category: Some("Home".to_string()),
            title: Some(title.to_string()),
            description: Some(format!("{} description", title)),
            price: Some(price),
            url: Some(format!("https://shop.example.com/p/{}", id)),
        }
    }

    async fn seeded() -> SqliteStore {
        let store = SqliteStore::open_memory(3).unwrap();
        store
            .add(
                &[
                    vec![1.0, 0.0, 0.0],
                    vec![0.0, 1.0, 0.0],
                    vec![0.7, 0.7, 0.0],
                ],
                &[md(1, "Lamp", 25.0), md(2, "Chair", 140.0), md(3, "Desk", 90.0)],
                &[1, 2, 3],
            )
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_open_memory() {
        let store = SqliteStore::open_memory(3).unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
        assert!(store.search(&[1.0, 0.0, 0.0], 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_knn_search() {
        let store = seeded().await;
        let results = store.search(&[1.0, 0.1, 0.0], 2).await.unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, 1);
        assert_eq!(results[1].id, 3);
        assert!(results[0].similarity > results[1].similarity);
        assert_eq!(results[0].metadata.title.as_deref(), Some("Lamp"));
    }

    #[tokio::test]
    async fn test_oversized_k_is_clamped() {
        let store = seeded().await;
        assert_eq!(store.search_limit(), Some(MAX_KNN));

        let results = store.search(&[1.0, 0.1, 0.0], MAX_KNN * 3).await.unwrap();
        assert_eq!(results.len(), store.count().await.unwrap());
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let store = seeded().await;
        let query = [0.6, 0.8, 0.0];
        let before = store.search(&query, 3).await.unwrap();

        store
            .add(&[vec![0.7, 0.7, 0.0]], &[md(3, "Desk", 90.0)], &[3])
            .await
            .unwrap();

        assert_eq!(store.count().await.unwrap(), 3);
        let after = store.search(&query, 3).await.unwrap();
        let ids = |c: &[Candidate]| c.iter().map(|c| c.id).collect::<Vec<_>>();
        assert_eq!(ids(&before), ids(&after));
    }

    #[tokio::test]
    async fn test_upsert_replaces_metadata() {
        let store = seeded().await;
        store
            .add(&[vec![0.0, 0.0, 1.0]], &[md(2, "Sofa", 400.0)], &[2])
            .await
            .unwrap();

        let fetched = store.fetch(2).await.unwrap().unwrap();
        assert_eq!(fetched.metadata.title.as_deref(), Some("Sofa"));
        assert_eq!(fetched.embedding, vec![0.0, 0.0, 1.0]);
        assert!(store.fetch(99).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejected() {
        let store = SqliteStore::open_memory(3).unwrap();
        let err = store
            .add(&[vec![1.0, 0.0]], &[md(1, "Lamp", 1.0)], &[1])
            .await
            .unwrap_err();
        assert!(err.is_validation());
        assert!(store.search(&[1.0], 1).await.unwrap_err().is_validation());
    }

    #[tokio::test]
    async fn test_reopen_with_other_dimension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("products.db");

        {
            let store = SqliteStore::open(&path, 3).unwrap();
            store
                .add(&[vec![1.0, 0.0, 0.0]], &[md(1, "Lamp", 25.0)], &[1])
                .await
                .unwrap();
            store.close().await.unwrap();
        }

        let reopened = SqliteStore::open(&path, 3).unwrap();
        assert_eq!(reopened.count().await.unwrap(), 1);
        drop(reopened);

        assert!(SqliteStore::open(&path, 4).is_err());
    }
}
