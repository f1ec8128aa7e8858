//! Standalone operational tool: copies reader key, reader identifier, and all
//! issuers from one key-material store into another (spec.md §4.1). Useful
//! when switching a reader between file-backed and REST-backed persistence,
//! or when moving state to a fresh install.
//!
//! Usage: `homekey-migrate <source-path-or-url> <destination-path-or-url>`.
//! A value starting with `http://` or `https://` is treated as a REST store
//! (no bearer token is sent); anything else is opened as a file store.

use std::process::ExitCode;
use std::sync::Arc;

use homekey_store::FileStore;
use homekey_store::KeyMaterialStore;
use homekey_store::RestStore;

async fn open_store(location: &str) -> Result<Arc<dyn KeyMaterialStore>, homekey_store::StoreError> {
    if location.starts_with("http://") || location.starts_with("https://") {
        Ok(RestStore::connect(location.to_string(), None).await?)
    } else {
        Ok(FileStore::open(location).await?)
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    homekey_common::logging::init(false);

    let mut args = std::env::args().skip(1);
    let (Some(source_location), Some(destination_location)) = (args.next(), args.next()) else {
        eprintln!("usage: homekey-migrate <source-path-or-url> <destination-path-or-url>");
        return ExitCode::FAILURE;
    };

    let source = match open_store(&source_location).await {
        Ok(store) => store,
        Err(error) => {
            eprintln!("failed to open source store: {error}");
            return ExitCode::FAILURE;
        }
    };
    let destination = match open_store(&destination_location).await {
        Ok(store) => store,
        Err(error) => {
            eprintln!("failed to open destination store: {error}");
            return ExitCode::FAILURE;
        }
    };

    match homekey_store::migrate(source.as_ref(), destination.as_ref()).await {
        Ok(()) => {
            println!("migrated key material from {source_location} to {destination_location}");
            ExitCode::SUCCESS
        }
        Err(error) => {
            eprintln!("migration failed: {error}");
            ExitCode::FAILURE
        }
    }
}
