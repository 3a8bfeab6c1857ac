//! Shared fixtures: typed test models and a recording fake repository

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use weft_core::model::FieldType;
use weft_core::{
    Context, Db, Model, ModelRegistry, ModelStruct, Record, Repository, RepositoryError,
    RepositoryErrorKind, RepositoryResult, RepositoryTransaction, Scope, TxOptions,
};

// ---------- models ----------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: i64,
    pub title: String,
    pub blog_id: Option<i64>,
}

impl Model for Post {
    fn collection_name() -> &'static str {
        "posts"
    }

    fn model_struct() -> ModelStruct {
        ModelStruct::builder("posts")
            .primary("id", FieldType::Integer)
            .attribute("title", FieldType::String)
            .foreign_key("blog_id", FieldType::Integer)
            .belongs_to("blog", "blogs", "blog_id")
            .has_many("comments", "comments", "post_id")
            .build()
            .expect("valid posts model")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blog {
    pub id: i64,
    pub title: String,
}

impl Model for Blog {
    fn collection_name() -> &'static str {
        "blogs"
    }

    fn model_struct() -> ModelStruct {
        ModelStruct::builder("blogs")
            .primary("id", FieldType::Integer)
            .attribute("title", FieldType::String)
            .has_many("posts", "posts", "blog_id")
            .build()
            .expect("valid blogs model")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: i64,
    pub post_id: i64,
    pub body: String,
}

impl Model for Comment {
    fn collection_name() -> &'static str {
        "comments"
    }

    fn model_struct() -> ModelStruct {
        ModelStruct::builder("comments")
            .primary("id", FieldType::Integer)
            .foreign_key("post_id", FieldType::Integer)
            .attribute("body", FieldType::String)
            .build()
            .expect("valid comments model")
    }
}

pub fn registry() -> ModelRegistry {
    let mut registry = ModelRegistry::new();
    registry.register_model::<Post>().unwrap();
    registry.register_model::<Blog>().unwrap();
    registry.register_model::<Comment>().unwrap();
    registry
}

pub fn post(id: i64, title: &str, blog_id: Option<i64>) -> Post {
    Post {
        id,
        title: title.to_string(),
        blog_id,
    }
}

pub fn blog(id: i64, title: &str) -> Blog {
    Blog {
        id,
        title: title.to_string(),
    }
}

pub fn comment(id: i64, post_id: i64, body: &str) -> Comment {
    Comment {
        id,
        post_id,
        body: body.to_string(),
    }
}

/// Scope carrying one typed instance
pub fn scope_with<M: Model>(db: &Db, model: &M) -> Scope {
    let mut scope = Scope::for_model::<M>(db.registry()).unwrap();
    scope.add_model(model).unwrap();
    scope
}

pub fn scope_for<M: Model>(db: &Db) -> Scope {
    Scope::for_model::<M>(db.registry()).unwrap()
}

// ---------- recording fake repository ----------

/// Shared, ordered log of backend calls across every fake repository
#[derive(Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<String>>>,
}

impl CallLog {
    fn push(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    /// Every call as `repository.op` or `repository.op(arg)`
    pub fn all(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls made on one repository, without the repository prefix
    pub fn for_repo(&self, repository: &str) -> Vec<String> {
        let prefix = format!("{}.", repository);
        self.all()
            .into_iter()
            .filter_map(|c| c.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }

    pub fn count(&self, call: &str) -> usize {
        self.all().iter().filter(|c| *c == call).count()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }
}

#[derive(Default)]
struct FakeState {
    rows: HashMap<String, Vec<Record>>,
    failures: HashMap<String, RepositoryErrorKind>,
    latency: Option<Duration>,
    supports_exists: bool,
}

/// In-process repository that records every call
///
/// Writes go straight to a shared row set; the fake exists to observe the
/// coordinator, not to isolate transactions.
#[derive(Clone)]
pub struct FakeRepository {
    id: String,
    log: CallLog,
    state: Arc<Mutex<FakeState>>,
}

impl FakeRepository {
    pub fn new(id: &str, log: &CallLog) -> Self {
        Self {
            id: id.to_string(),
            log: log.clone(),
            state: Arc::new(Mutex::new(FakeState {
                supports_exists: true,
                ..FakeState::default()
            })),
        }
    }

    /// Make every future call of `op` fail with `kind`
    pub fn fail_on(&self, op: &str, kind: RepositoryErrorKind) {
        self.state.lock().unwrap().failures.insert(op.to_string(), kind);
    }

    pub fn clear_failures(&self) {
        self.state.lock().unwrap().failures.clear();
    }

    /// Delay every call by `latency`
    pub fn with_latency(self, latency: Duration) -> Self {
        self.state.lock().unwrap().latency = Some(latency);
        self
    }

    pub fn without_exists(self) -> Self {
        self.state.lock().unwrap().supports_exists = false;
        self
    }

    pub fn rows(&self, collection: &str) -> Vec<Record> {
        self.state
            .lock()
            .unwrap()
            .rows
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    pub fn seed(&self, collection: &str, records: Vec<Record>) {
        self.state
            .lock()
            .unwrap()
            .rows
            .entry(collection.to_string())
            .or_default()
            .extend(records);
    }

    pub fn arc(&self) -> Arc<dyn Repository> {
        Arc::new(self.clone())
    }
}

async fn enter(id: &str, log: &CallLog, state: &Arc<Mutex<FakeState>>, call: String, op: &str) -> RepositoryResult<()> {
    log.push(format!("{}.{}", id, call));
    let (latency, failure) = {
        let state = state.lock().unwrap();
        (state.latency, state.failures.get(op).copied())
    };
    if let Some(latency) = latency {
        tokio::time::sleep(latency).await;
    }
    match failure {
        Some(kind) => Err(RepositoryError::new(kind, format!("injected {} failure", op))),
        None => Ok(()),
    }
}

#[async_trait]
impl Repository for FakeRepository {
    fn id(&self) -> &str {
        &self.id
    }

    async fn begin(
        &self,
        _ctx: &Context,
        _options: &TxOptions,
    ) -> RepositoryResult<Box<dyn RepositoryTransaction>> {
        enter(&self.id, &self.log, &self.state, "begin".to_string(), "begin").await?;
        Ok(Box::new(FakeTransaction {
            repo: self.clone(),
        }))
    }

    async fn close(&self, _ctx: &Context) -> RepositoryResult<()> {
        enter(&self.id, &self.log, &self.state, "close".to_string(), "close").await
    }
}

pub struct FakeTransaction {
    repo: FakeRepository,
}

impl FakeTransaction {
    async fn enter(&self, call: String, op: &str) -> RepositoryResult<()> {
        enter(&self.repo.id, &self.repo.log, &self.repo.state, call, op).await
    }

    fn matching(&self, scope: &Scope) -> Vec<Record> {
        let state = self.repo.state.lock().unwrap();
        state
            .rows
            .get(scope.model().collection())
            .map(|rows| rows.iter().filter(|r| scope.matches(r)).cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl RepositoryTransaction for FakeTransaction {
    async fn commit(&mut self, _ctx: &Context) -> RepositoryResult<()> {
        self.enter("commit".to_string(), "commit").await
    }

    async fn rollback(&mut self, _ctx: &Context) -> RepositoryResult<()> {
        self.enter("rollback".to_string(), "rollback").await
    }

    async fn savepoint(&mut self, _ctx: &Context, name: &str) -> RepositoryResult<()> {
        self.enter(format!("savepoint({})", name), "savepoint").await
    }

    async fn rollback_savepoint(&mut self, _ctx: &Context, name: &str) -> RepositoryResult<()> {
        self.enter(format!("rollback_savepoint({})", name), "rollback_savepoint")
            .await
    }

    async fn insert(&mut self, _ctx: &Context, scope: &mut Scope) -> RepositoryResult<()> {
        self.enter(format!("insert({})", scope.model().collection()), "insert")
            .await?;
        self.repo.seed(scope.model().collection(), scope.values().to_vec());
        Ok(())
    }

    async fn update(&mut self, _ctx: &Context, scope: &Scope) -> RepositoryResult<u64> {
        self.enter(format!("update({})", scope.model().collection()), "update")
            .await?;
        Ok(self.matching(scope).len() as u64)
    }

    async fn delete(&mut self, _ctx: &Context, scope: &Scope) -> RepositoryResult<u64> {
        self.enter(format!("delete({})", scope.model().collection()), "delete")
            .await?;
        let mut state = self.repo.state.lock().unwrap();
        let rows = state
            .rows
            .entry(scope.model().collection().to_string())
            .or_default();
        let before = rows.len();
        rows.retain(|r| !scope.matches(r));
        Ok((before - rows.len()) as u64)
    }

    async fn get(&mut self, _ctx: &Context, scope: &mut Scope) -> RepositoryResult<()> {
        self.enter(format!("get({})", scope.model().collection()), "get")
            .await?;
        let mut found = self.matching(scope);
        if found.is_empty() {
            return Err(RepositoryError::not_found(format!(
                "no {} record matches",
                scope.model().collection()
            )));
        }
        found.truncate(1);
        scope.set_values(found);
        Ok(())
    }

    async fn list(&mut self, _ctx: &Context, scope: &mut Scope) -> RepositoryResult<()> {
        self.enter(format!("list({})", scope.model().collection()), "list")
            .await?;
        let found = scope.apply_window(self.matching(scope));
        scope.set_values(found);
        Ok(())
    }

    async fn count(&mut self, _ctx: &Context, scope: &Scope) -> RepositoryResult<i64> {
        self.enter(format!("count({})", scope.model().collection()), "count")
            .await?;
        Ok(self.matching(scope).len() as i64)
    }

    async fn exists(&mut self, _ctx: &Context, scope: &Scope) -> RepositoryResult<bool> {
        self.enter(format!("exists({})", scope.model().collection()), "exists")
            .await?;
        if !self.repo.state.lock().unwrap().supports_exists {
            return Err(RepositoryError::unsupported("exists"));
        }
        Ok(!self.matching(scope).is_empty())
    }
}

// ---------- database fixtures ----------

/// Two fakes: posts and comments on `r1`, blogs on `r2`
pub struct Fixture {
    pub db: Db,
    pub log: CallLog,
    pub r1: FakeRepository,
    pub r2: FakeRepository,
}

pub fn fixture() -> Fixture {
    let log = CallLog::default();
    let r1 = FakeRepository::new("r1", &log);
    let r2 = FakeRepository::new("r2", &log);
    fixture_with(log, r1, r2)
}

pub fn fixture_with(log: CallLog, r1: FakeRepository, r2: FakeRepository) -> Fixture {
    let db = Db::builder()
        .registry(registry())
        .repository(r1.arc())
        .repository(r2.arc())
        .repository_models("r1", ["posts", "comments"])
        .repository_models("r2", ["blogs"])
        .build()
        .unwrap();
    Fixture { db, log, r1, r2 }
}

/// Three fakes, one per model: posts on `a`, blogs on `b`, comments on `c`
pub struct TripleFixture {
    pub db: Db,
    pub log: CallLog,
    pub a: FakeRepository,
    pub b: FakeRepository,
    pub c: FakeRepository,
}

pub fn triple_fixture() -> TripleFixture {
    let log = CallLog::default();
    let a = FakeRepository::new("a", &log);
    let b = FakeRepository::new("b", &log);
    let c = FakeRepository::new("c", &log);
    let db = Db::builder()
        .registry(registry())
        .repository(a.arc())
        .repository(b.arc())
        .repository(c.arc())
        .disallow_default_repository()
        .repository_models("a", ["posts"])
        .repository_models("b", ["blogs"])
        .repository_models("c", ["comments"])
        .build()
        .unwrap();
    TripleFixture { db, log, a, b, c }
}
