//! Catalog index gateway: an append-only store of upload metadata with
//! exact-match filtered lookup. `SqliteCatalog` keeps every record in one
//! table, partitioned by record kind.

use crate::{
    errors::FailureClass,
    models::catalog::{CatalogRecord, IndexedRecord},
    services::{Probe, blob_store::classify_sqlx},
};
use async_trait::async_trait;
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("invalid filter `{field}`: {reason}")]
    InvalidFilter { field: String, reason: String },
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

impl CatalogError {
    pub fn class(&self) -> FailureClass {
        match self {
            CatalogError::InvalidFilter { .. } => FailureClass::InvalidRequest,
            CatalogError::Sqlx(err) => classify_sqlx(err),
        }
    }
}

pub type CatalogResult<T> = Result<T, CatalogError>;

/// One exact-match condition on a record field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogFilter {
    Name(String),
    Url(String),
    Uploader(String),
    Timestamp(i64),
}

impl CatalogFilter {
    /// Build a filter from a field name and its textual value.
    pub fn parse(field: &str, value: &str) -> CatalogResult<Self> {
        match field {
            "name" => Ok(CatalogFilter::Name(value.to_string())),
            "url" => Ok(CatalogFilter::Url(value.to_string())),
            "uploader" => Ok(CatalogFilter::Uploader(value.to_string())),
            "timestamp" => value
                .parse::<i64>()
                .map(CatalogFilter::Timestamp)
                .map_err(|_| CatalogError::InvalidFilter {
                    field: field.to_string(),
                    reason: format!("`{}` is not an integer", value),
                }),
            other => Err(CatalogError::InvalidFilter {
                field: other.to_string(),
                reason: "unknown field".into(),
            }),
        }
    }

    pub fn parse_all<I, K, V>(pairs: I) -> CatalogResult<Vec<Self>>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        pairs
            .into_iter()
            .map(|(field, value)| Self::parse(field.as_ref(), value.as_ref()))
            .collect()
    }

    fn column(&self) -> &'static str {
        match self {
            CatalogFilter::Name(_) => "name",
            CatalogFilter::Url(_) => "url",
            CatalogFilter::Uploader(_) => "uploader",
            CatalogFilter::Timestamp(_) => "timestamp",
        }
    }
}

#[async_trait]
pub trait CatalogIndex: Send + Sync + 'static {
    /// Append `record`, returning the identifier the index assigned.
    async fn insert(&self, record: &CatalogRecord) -> CatalogResult<Uuid>;

    /// Records matching every filter; all records when `filters` is empty.
    async fn query(&self, filters: &[CatalogFilter]) -> CatalogResult<Vec<IndexedRecord>>;

    async fn health_check(&self) -> Vec<Probe>;
}

#[derive(Clone)]
pub struct SqliteCatalog {
    pub db: Arc<SqlitePool>,

    /// Record category every insert and query is scoped to.
    pub kind: String,
}

impl SqliteCatalog {
    pub fn new(db: Arc<SqlitePool>, kind: impl Into<String>) -> Self {
        Self {
            db,
            kind: kind.into(),
        }
    }
}

#[async_trait]
impl CatalogIndex for SqliteCatalog {
    async fn insert(&self, record: &CatalogRecord) -> CatalogResult<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO catalog_records (id, kind, name, url, uploader, timestamp)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(&self.kind)
        .bind(&record.name)
        .bind(&record.url)
        .bind(&record.uploader)
        .bind(record.timestamp)
        .execute(&*self.db)
        .await?;

        debug!(kind = %self.kind, name = %record.name, %id, "inserted catalog record");
        Ok(id)
    }

    async fn query(&self, filters: &[CatalogFilter]) -> CatalogResult<Vec<IndexedRecord>> {
        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT id, name, url, uploader, timestamp FROM catalog_records WHERE kind = ",
        );
        builder.push_bind(&self.kind);

        for filter in filters {
            builder.push(" AND ");
            builder.push(filter.column());
            builder.push(" = ");
            match filter {
                CatalogFilter::Name(v) | CatalogFilter::Url(v) | CatalogFilter::Uploader(v) => {
                    builder.push_bind(v.clone());
                }
                CatalogFilter::Timestamp(t) => {
                    builder.push_bind(*t);
                }
            }
        }

        let rows: Vec<IndexedRecord> = builder.build_query_as().fetch_all(&*self.db).await?;
        Ok(rows)
    }

    async fn health_check(&self) -> Vec<Probe> {
        let probe = match sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await
        {
            Ok(1) => Probe::ok("catalog_sqlite"),
            Ok(v) => Probe::failed("catalog_sqlite", format!("unexpected result: {}", v)),
            Err(e) => Probe::failed("catalog_sqlite", format!("error: {}", e)),
        };
        vec![probe]
    }
}
