//! Script execution command

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use serde_json::Value;
use tracing::warn;
use weft_core::{Context, Db, FilterOperator, ModelRegistry, Scope, Transaction, TransactionState, WeftError};
use weft_store::open_db;

use super::load_config;
use super::script::{self, Step};

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Configuration file (TOML)
    #[arg(long)]
    pub config: PathBuf,

    /// Script to execute
    pub script: PathBuf,

    /// Abort the whole script after this many milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,
}

pub async fn execute(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(&args.config)?;
    let source = std::fs::read_to_string(&args.script)?;
    let lines = script::parse(&source)?;

    let db = open_db(&config, ModelRegistry::new(), args.config.parent())?;
    let ctx = match args.timeout_ms {
        Some(ms) => Context::background().with_timeout(Duration::from_millis(ms)),
        None => Context::background(),
    };

    let mut tx = db.begin(&ctx, None).await?;
    let mut outcome = Ok(());
    for line in lines {
        if let Err(e) = apply(&db, &mut tx, line.step).await {
            outcome = Err(format!("line {}: {}", line.number, e));
            break;
        }
    }

    if tx.state() == TransactionState::Active {
        if let Err(e) = tx.rollback().await {
            warn!(error = %e, "rollback at end of script failed");
        }
        println!("rolled back");
    }
    db.close(&Context::background()).await?;

    outcome.map_err(Into::into)
}

fn scope(db: &Db, collection: &str) -> weft_core::Result<Scope> {
    Scope::for_collection(db.registry(), collection)
}

fn render(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| value.to_string())
}

async fn apply(db: &Db, tx: &mut Transaction, step: Step) -> weft_core::Result<()> {
    match step {
        Step::Insert { collection, record } => {
            let mut scope = scope(db, &collection)?.value(record)?;
            tx.insert(&mut scope).await?;
            for record in scope.values() {
                println!("inserted {} {}", collection, render(&Value::Object(record.clone())));
            }
        }
        Step::Update { collection, mut record } => {
            let scope = scope(db, &collection)?;
            let primary = scope.model().primary().name.clone();
            let id = record.remove(&primary).ok_or_else(|| {
                WeftError::invalid_input(format!("update needs the primary key '{}'", primary))
            })?;
            let scope = scope.with_primary(id)?.value(record)?;
            println!("updated {} {}", collection, tx.update(&scope).await?);
        }
        Step::Delete { collection, field, value } => {
            let scope = scope(db, &collection)?.filter(&field, FilterOperator::Equal, [value])?;
            println!("deleted {} {}", collection, tx.delete(&scope).await?);
        }
        Step::Get { collection, id } => {
            let mut scope = scope(db, &collection)?.with_primary(id)?;
            tx.get(&mut scope).await?;
            let record = scope.take_values().into_iter().next().unwrap_or_default();
            println!("{}", render(&Value::Object(record)));
        }
        Step::List { collection } => {
            let mut scope = scope(db, &collection)?;
            tx.list(&mut scope).await?;
            let records = scope.take_values().into_iter().map(Value::Object).collect();
            println!("{}", render(&Value::Array(records)));
        }
        Step::Count { collection } => {
            println!("{}", tx.count(&scope(db, &collection)?).await?);
        }
        Step::Savepoint(name) => {
            tx.savepoint(&name).await?;
            println!("savepoint {}", name);
        }
        Step::RollbackTo(name) => {
            tx.rollback_savepoint(&name).await?;
            println!("rolled back to {}", name);
        }
        Step::Commit => {
            tx.commit().await?;
            println!("committed");
        }
        Step::Rollback => {
            tx.rollback().await?;
            println!("rolled back");
        }
    }
    Ok(())
}
