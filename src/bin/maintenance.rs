use std::collections::HashSet;
use std::env;

use anyhow::{Context, Result};

use sheetcast::{
    config::AppConfig,
    db::{self, PgPool},
    storage::{FileStorage, LocalStorage, UPLOADS_DIR},
    store,
};

const USAGE: &str = "Usage: maintenance <prune-orphans|list>";

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let mut args = env::args().skip(1);
    match args.next().as_deref() {
        Some("prune-orphans") => prune_orphans().await?,
        Some("list") => list_uploads()?,
        Some(cmd) => {
            eprintln!("Unknown command: {cmd}\n{USAGE}");
            std::process::exit(1);
        }
        None => {
            eprintln!("{USAGE}");
            std::process::exit(1);
        }
    }

    Ok(())
}

fn connect() -> Result<(AppConfig, PgPool)> {
    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "maintenance",
        database_url = %config.redacted_database_url(),
        media_root = %config.media_root.display(),
        "loaded configuration"
    );
    let pool = db::init_pool_with_size(&config.database_url, 1)?;
    Ok((config, pool))
}

async fn prune_orphans() -> Result<()> {
    let (config, pool) = connect()?;
    let storage = LocalStorage::new(config.media_root.clone());

    let referenced: HashSet<String> = {
        let mut conn = pool.get().context("failed to get database connection")?;
        store::list_stored_files(&mut conn)
            .context("failed to load stored file references")?
            .into_iter()
            .collect()
    };

    let orphans: Vec<String> = storage
        .list_files(UPLOADS_DIR)
        .await?
        .into_iter()
        .filter(|key| !referenced.contains(key))
        .collect();

    if orphans.is_empty() {
        println!("No orphaned files found.");
        return Ok(());
    }

    println!("Deleting {} orphaned files…", orphans.len());

    for key in &orphans {
        if let Err(err) = storage.delete_file(key).await {
            eprintln!("Failed to delete {key}: {err}");
        }
    }

    println!("Orphaned files removed.");
    Ok(())
}

fn list_uploads() -> Result<()> {
    let (_, pool) = connect()?;
    let mut conn = pool.get().context("failed to get database connection")?;
    let uploads = store::list_uploads(&mut conn).context("failed to load uploads")?;

    if uploads.is_empty() {
        println!("No uploads found.");
        return Ok(());
    }

    for upload in uploads {
        println!(
            "{}\t{}\t{} rows\t{}",
            upload.id,
            upload.display_name,
            upload.rows(),
            upload.created_at
        );
    }
    Ok(())
}
