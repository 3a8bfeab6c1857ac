//! Shared fixtures: an authors/books schema and a backend behaviour suite
//!
//! The suite functions run the same scenarios against any `Db` whose
//! authors and books collections are mapped to real repositories.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use serde_json::{json, Value};
use weft_core::model::FieldType;
use weft_core::{
    Context, Db, ErrorKind, FilterOperator, ModelRegistry, ModelStruct, Pagination, Record,
    RepositoryErrorKind, Scope, TxOptions, WeftError,
};
use weft_store::{MemoryRepository, SqliteRepository};

pub fn registry() -> ModelRegistry {
    let mut registry = ModelRegistry::new();
    registry
        .register(
            ModelStruct::builder("authors")
                .primary("id", FieldType::Integer)
                .attribute("name", FieldType::String)
                .has_many("books", "books", "author_id")
                .build()
                .unwrap(),
        )
        .unwrap();
    registry
        .register(
            ModelStruct::builder("books")
                .primary("id", FieldType::Uuid)
                .attribute("title", FieldType::String)
                .attribute("pages", FieldType::Integer)
                .foreign_key("author_id", FieldType::Integer)
                .belongs_to("author", "authors", "author_id")
                .build()
                .unwrap(),
        )
        .unwrap();
    registry
}

pub fn record(value: Value) -> Record {
    value.as_object().cloned().unwrap()
}

pub fn scope(db: &Db, collection: &str) -> Scope {
    Scope::for_collection(db.registry(), collection).unwrap()
}

pub fn author(db: &Db, id: i64, name: &str) -> Scope {
    scope(db, "authors")
        .value(record(json!({"id": id, "name": name})))
        .unwrap()
}

pub fn book(db: &Db, title: &str, pages: i64, author_id: i64) -> Scope {
    scope(db, "books")
        .value(record(json!({"title": title, "pages": pages, "author_id": author_id})))
        .unwrap()
}

/// Every repository-level failure surfaces wrapped with its origin
pub fn backend_kind(err: &WeftError) -> Option<RepositoryErrorKind> {
    match err {
        WeftError::Backend { source, .. } => Some(source.kind()),
        _ => None,
    }
}

// ---------- databases ----------

pub fn memory_db() -> Db {
    Db::builder()
        .registry(registry())
        .repository(Arc::new(MemoryRepository::new("mem")))
        .build()
        .unwrap()
}

pub fn sqlite_db(path: &Path) -> Db {
    Db::builder()
        .registry(registry())
        .repository(Arc::new(SqliteRepository::open("sql", path).unwrap()))
        .build()
        .unwrap()
}

/// Authors in memory, books in SQLite
pub fn mixed_db(path: &Path) -> Db {
    Db::builder()
        .registry(registry())
        .repository(Arc::new(MemoryRepository::new("mem")))
        .repository(Arc::new(SqliteRepository::open("sql", path).unwrap()))
        .disallow_default_repository()
        .repository_models("mem", ["authors"])
        .repository_models("sql", ["books"])
        .build()
        .unwrap()
}

async fn titles(db: &Db, mut query: Scope) -> Vec<String> {
    db.list(&Context::background(), &mut query).await.unwrap();
    query
        .values()
        .iter()
        .map(|r| r["title"].as_str().unwrap().to_string())
        .collect()
}

async fn count(db: &Db, collection: &str) -> i64 {
    db.count(&Context::background(), &scope(db, collection))
        .await
        .unwrap()
}

// ---------- behaviour suite ----------

/// Insert, read back, update and delete in single-operation transactions
pub async fn check_crud(db: &Db) {
    let ctx = Context::background();

    // GIVEN a book inserted without a primary key
    let mut insert = book(db, "Dune", 412, 1);
    db.insert(&ctx, &mut insert).await.unwrap();
    // THEN a UUID key was generated and written back
    let id = insert.values()[0]["id"].clone();
    assert!(uuid::Uuid::parse_str(id.as_str().unwrap()).is_ok());

    // WHEN fetching by primary key
    let mut get = scope(db, "books").with_primary(id.clone()).unwrap();
    db.get(&ctx, &mut get).await.unwrap();
    assert_eq!(get.values()[0]["title"], json!("Dune"));

    // WHEN updating the page count
    let update = scope(db, "books")
        .with_primary(id.clone())
        .unwrap()
        .value(record(json!({"pages": 500})))
        .unwrap();
    assert_eq!(db.update(&ctx, &update).await.unwrap(), 1);

    let mut get = scope(db, "books").with_primary(id.clone()).unwrap();
    db.get(&ctx, &mut get).await.unwrap();
    assert_eq!(get.values()[0]["pages"], json!(500));
    assert_eq!(get.values()[0]["id"], id);

    // WHEN deleting it
    let delete = scope(db, "books").with_primary(id.clone()).unwrap();
    assert_eq!(db.delete(&ctx, &delete).await.unwrap(), 1);

    // THEN it is gone
    let mut get = scope(db, "books").with_primary(id).unwrap();
    let err = db.get(&ctx, &mut get).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Backend);
    assert_eq!(backend_kind(&err), Some(RepositoryErrorKind::NotFound));
}

/// Integer keys are assigned sequentially and duplicates are rejected
pub async fn check_keys(db: &Db) {
    let ctx = Context::background();

    let mut first = scope(db, "authors")
        .value(record(json!({"name": "Le Guin"})))
        .unwrap()
        .value(record(json!({"name": "Herbert"})))
        .unwrap();
    db.insert(&ctx, &mut first).await.unwrap();
    assert_eq!(first.values()[0]["id"], json!(1));
    assert_eq!(first.values()[1]["id"], json!(2));

    let err = db.insert(&ctx, &mut author(db, 2, "Banks")).await.unwrap_err();
    assert_eq!(backend_kind(&err), Some(RepositoryErrorKind::Constraint));
    assert_eq!(count(db, "authors").await, 2);
}

/// Filters, sorting, pagination and projection
pub async fn check_queries(db: &Db) {
    let ctx = Context::background();
    for (title, pages, author_id) in [
        ("Anathem", 937, 1),
        ("Babel", 545, 2),
        ("Cryptonomicon", 918, 1),
        ("Dhalgren", 801, 3),
    ] {
        db.insert(&ctx, &mut book(db, title, pages, author_id)).await.unwrap();
    }
    db.insert(
        &ctx,
        &mut scope(db, "books")
            .value(record(json!({"title": "Untitled"})))
            .unwrap(),
    )
    .await
    .unwrap();

    let by = |op: FilterOperator, field: &str, values: Vec<Value>| {
        scope(db, "books").filter(field, op, values).unwrap()
    };

    assert_eq!(
        titles(db, by(FilterOperator::GreaterThan, "pages", vec![json!(900)]).sort("title").unwrap()).await,
        vec!["Anathem", "Cryptonomicon"]
    );
    assert_eq!(
        titles(db, by(FilterOperator::In, "author_id", vec![json!(2), json!(3)]).sort("-title").unwrap()).await,
        vec!["Dhalgren", "Babel"]
    );
    assert_eq!(
        titles(db, by(FilterOperator::NotIn, "author_id", vec![json!(1)]).sort("title").unwrap()).await,
        vec!["Babel", "Dhalgren", "Untitled"]
    );
    assert_eq!(
        titles(db, by(FilterOperator::IsNull, "pages", vec![])).await,
        vec!["Untitled"]
    );
    assert_eq!(
        titles(db, by(FilterOperator::StartsWith, "title", vec![json!("Cry")])).await,
        vec!["Cryptonomicon"]
    );
    assert_eq!(
        titles(db, by(FilterOperator::EndsWith, "title", vec![json!("el")])).await,
        vec!["Babel"]
    );
    assert_eq!(
        titles(db, by(FilterOperator::Contains, "title", vec![json!("hal")])).await,
        vec!["Dhalgren"]
    );
    // type mismatches never match
    assert!(titles(db, by(FilterOperator::LessThan, "title", vec![json!(5)])).await.is_empty());

    let paged = scope(db, "books")
        .sort("title")
        .unwrap()
        .page(Pagination::paged(2, 2))
        .unwrap();
    assert_eq!(titles(db, paged).await, vec!["Cryptonomicon", "Dhalgren"]);

    let offset = scope(db, "books")
        .sort("-pages")
        .unwrap()
        .page(Pagination::limit_offset(0, 3))
        .unwrap();
    assert_eq!(titles(db, offset).await, vec!["Babel", "Untitled"]);

    let mut projected = scope(db, "books")
        .filter("title", FilterOperator::Equal, [json!("Babel")])
        .unwrap()
        .select(["title"])
        .unwrap();
    db.list(&ctx, &mut projected).await.unwrap();
    let keys: Vec<&String> = projected.values()[0].keys().collect();
    assert_eq!(keys.len(), 2, "primary key is always selected");
    assert!(projected.values()[0].contains_key("id"));

    let filtered = by(FilterOperator::Equal, "author_id", vec![json!(1)]);
    assert_eq!(db.count(&ctx, &filtered).await.unwrap(), 2);
    assert!(db.exists(&ctx, &filtered).await.unwrap());
    assert!(!db
        .exists(&ctx, &by(FilterOperator::Equal, "author_id", vec![json!(42)]))
        .await
        .unwrap());
}

/// Savepoints inside one repository
pub async fn check_savepoints(db: &Db) {
    let ctx = Context::background();
    let mut tx = db.begin(&ctx, None).await.unwrap();

    // GIVEN one book, then savepoint s1
    tx.insert(&mut book(db, "one", 1, 1)).await.unwrap();
    tx.savepoint("s1").await.unwrap();
    // AND a second book, then savepoint s2, and a third book
    tx.insert(&mut book(db, "two", 2, 1)).await.unwrap();
    tx.savepoint("s2").await.unwrap();
    tx.insert(&mut book(db, "three", 3, 1)).await.unwrap();
    assert_eq!(tx.count(&scope(db, "books")).await.unwrap(), 3);

    // WHEN rolling back to s1
    tx.rollback_savepoint("s1").await.unwrap();

    // THEN only the first book remains and s2 is gone
    assert_eq!(tx.count(&scope(db, "books")).await.unwrap(), 1);
    assert_eq!(
        tx.rollback_savepoint("s2").await.unwrap_err().kind(),
        ErrorKind::SavepointNotFound
    );

    // WHEN writing again and rolling back to s1 a second time
    tx.insert(&mut book(db, "four", 4, 1)).await.unwrap();
    tx.rollback_savepoint("s1").await.unwrap();
    tx.insert(&mut book(db, "five", 5, 1)).await.unwrap();
    tx.commit().await.unwrap();

    // THEN the committed state is the first book plus the last one
    assert_eq!(
        titles(db, scope(db, "books").sort("pages").unwrap()).await,
        vec!["one", "five"]
    );
}

/// Rolled back and read-only transactions leave no trace
pub async fn check_isolation(db: &Db) {
    let ctx = Context::background();

    let mut tx = db.begin(&ctx, None).await.unwrap();
    tx.insert(&mut book(db, "discarded", 1, 1)).await.unwrap();
    tx.rollback().await.unwrap();
    assert_eq!(count(db, "books").await, 0);

    let mut tx = db.begin(&ctx, Some(TxOptions::read_only())).await.unwrap();
    let err = tx.insert(&mut book(db, "refused", 1, 1)).await.unwrap_err();
    assert_eq!(backend_kind(&err), Some(RepositoryErrorKind::ReadOnly));
    tx.rollback().await.unwrap();

    // a dropped transaction never publishes its writes
    {
        let mut tx = db.begin(&ctx, None).await.unwrap();
        tx.insert(&mut book(db, "dropped", 1, 1)).await.unwrap();
    }
    assert_eq!(count(db, "books").await, 0);
}
