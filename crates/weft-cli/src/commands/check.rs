//! Configuration check command

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use weft_core::config::Driver;
use weft_core::repository::Repository;
use weft_core::{Db, ModelRegistry};
use weft_store::MemoryRepository;

use super::load_config;

#[derive(Debug, Args)]
pub struct CheckArgs {
    /// Configuration file (TOML)
    #[arg(long)]
    pub config: PathBuf,
}

pub fn execute(args: CheckArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(&args.config)?;

    // Stand-ins resolve the mapping without touching any database file
    let stand_ins: Vec<Arc<dyn Repository>> = config
        .repositories
        .keys()
        .map(|name| Arc::new(MemoryRepository::new(name.as_str())) as Arc<dyn Repository>)
        .collect();
    let db = Db::from_config(&config, ModelRegistry::new(), stand_ins)?;

    println!("Configuration OK: {}", args.config.display());
    for model in db.registry().iter() {
        let repository = db.mapper().get_repository_by_model_struct(model)?;
        let driver = match config.repositories.get(repository.id()).map(|r| r.driver) {
            Some(Driver::Memory) => "memory",
            Some(Driver::Sqlite) => "sqlite",
            None => "unknown",
        };
        println!("  {} -> {} ({})", model.collection(), repository.id(), driver);
    }
    Ok(())
}
