use anyhow::Result;
use photo_catalog::{
    config::AppConfig,
    db,
    routes::routes,
    services::{
        blob_store::{BlobStore, DiskBlobStore},
        catalog_index::{CatalogIndex, SqliteCatalog},
        reconciler::{OrphanReporter, Reconciler},
        upload_coordinator::UploadCoordinator,
    },
    state::AppState,
};
use std::{io::ErrorKind, path::Path, sync::Arc};
use tokio::{fs, net::TcpListener};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting photo-catalog with config: {:?}", cfg);

    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir).await?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    // --- Initialize the two backends' databases ---
    let blob_db = Arc::new(db::connect(&cfg.blob_database_url, cfg.backend_timeout).await?);
    let catalog_db = Arc::new(db::connect(&cfg.catalog_database_url, cfg.backend_timeout).await?);

    db::run_migrations(&blob_db, db::BLOB_MIGRATIONS).await?;
    db::run_migrations(&catalog_db, db::CATALOG_MIGRATIONS).await?;

    // --- Handle migration mode ---
    if migrate {
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Initialize backends and coordinator ---
    let blobs: Arc<dyn BlobStore> = Arc::new(DiskBlobStore::new(
        blob_db,
        cfg.storage_dir.clone(),
        cfg.public_base_url.clone(),
    ));
    let catalog: Arc<dyn CatalogIndex> =
        Arc::new(SqliteCatalog::new(catalog_db, cfg.record_kind.clone()));

    blobs.ensure_bucket(&cfg.bucket).await?;

    let (orphans, orphan_rx) = OrphanReporter::channel();
    tokio::spawn(
        Reconciler::new(catalog.clone(), cfg.reconcile_attempts, cfg.reconcile_delay)
            .run(orphan_rx),
    );

    let coordinator = UploadCoordinator::new(blobs.clone(), catalog.clone(), cfg.bucket.clone())
        .with_orphan_reporter(orphans);
    let state = AppState::new(coordinator, blobs, catalog, cfg.default_uploader.clone());

    // --- Build router ---
    let app = routes::app(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
