//! Query/mutation engine: route -> entity -> authorization -> predicate -> statement -> rows.
//!
//! Authorization always runs before any predicate is compiled or statement built, and a
//! transaction is only opened once a write has passed every check that does not need the
//! database. Each executor call is bounded by the request deadline.

use crate::auth::{Action, Allowed, PolicySet, RequestContext};
use crate::config::{DatabaseConfig, RestConfig, RuntimeConfig};
use crate::error::{ConfigError, DbError, EngineError};
use crate::executor::{DbExecutor, DbTransaction, Row};
use crate::filter::{
    compile_filter, compile_primary_key, parse_filter, parse_graphql_filter, ComparisonOp, FilterExpr, PredicateNode,
};
use crate::metadata::{EntityDescriptor, MetadataCatalog};
use crate::route::{parse_entity_and_key, parse_primary_key_route, PrimaryKeyRoute};
use crate::service::pagination::{continuation_predicate, encode_token, page_size, parse_order_by, stable_ordering};
use crate::service::request::{EngineRequest, EngineResponse, Operation, QueryOptions};
use crate::service::validation::PayloadValidator;
use crate::sql::{self, coerce_json, coerce_text, DbParameter, QueryBuf};
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::time::Instant;

/// Catalog and policies that are swapped together on refresh.
pub struct EngineSnapshot {
    pub catalog: Arc<dyn MetadataCatalog>,
    pub policies: PolicySet,
}

#[derive(Clone, Copy)]
struct Deadline {
    at: Instant,
    budget: Duration,
}

pub struct QueryEngine {
    snapshot: RwLock<Arc<EngineSnapshot>>,
    executor: Arc<dyn DbExecutor>,
    rest: RestConfig,
    database: DatabaseConfig,
}

impl QueryEngine {
    pub fn new(
        config: &RuntimeConfig,
        catalog: Arc<dyn MetadataCatalog>,
        executor: Arc<dyn DbExecutor>,
    ) -> Result<Self, ConfigError> {
        let policies = PolicySet::build(config, catalog.as_ref())?;
        Ok(QueryEngine {
            snapshot: RwLock::new(Arc::new(EngineSnapshot { catalog, policies })),
            executor,
            rest: config.rest.clone(),
            database: config.database.clone(),
        })
    }

    /// Current catalog and policies. Requests keep the snapshot they started with.
    pub fn snapshot(&self) -> Arc<EngineSnapshot> {
        self.snapshot.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Build policies against a new catalog and publish both at once.
    pub fn refresh(&self, config: &RuntimeConfig, catalog: Arc<dyn MetadataCatalog>) -> Result<(), ConfigError> {
        let policies = PolicySet::build(config, catalog.as_ref())?;
        let next = Arc::new(EngineSnapshot { catalog, policies });
        let mut guard = self
            .snapshot
            .write()
            .map_err(|_| ConfigError::Load("engine snapshot lock poisoned".into()))?;
        *guard = next;
        drop(guard);
        tracing::info!("engine snapshot refreshed");
        Ok(())
    }

    pub fn rest(&self) -> &RestConfig {
        &self.rest
    }

    pub async fn execute(&self, ctx: &RequestContext, req: EngineRequest) -> Result<EngineResponse, EngineError> {
        let result = self.dispatch(ctx, req).await;
        if let Err(EngineError::Database(e)) = &result {
            tracing::error!(error = %e, role = %ctx.role, "database failure");
        }
        result
    }

    async fn dispatch(&self, ctx: &RequestContext, req: EngineRequest) -> Result<EngineResponse, EngineError> {
        let (entity_name, key_route) = parse_entity_and_key(&self.rest.path, &req.route)?;
        let key = parse_primary_key_route(&key_route)?;
        let snapshot = self.snapshot();
        let entity = snapshot
            .catalog
            .resolve_entity(&entity_name)
            .ok_or_else(|| EngineError::EntityNotFound(entity_name.clone()))?;
        let policies = &snapshot.policies;
        for &action in req.operation.required_actions() {
            policies.permit(ctx, &entity, action)?;
        }
        let deadline = self.deadline(ctx);

        match req.operation {
            Operation::Find => self.find(policies, ctx, &entity, &key, &req.options, deadline).await,
            Operation::Insert => {
                if !key.is_empty() {
                    return Err(EngineError::BadRequest(
                        "insert does not take a primary key route".into(),
                    ));
                }
                self.insert(policies, ctx, &entity, req.body.as_ref(), deadline).await
            }
            Operation::Update => self.update(policies, ctx, &entity, &key, req.body.as_ref(), deadline).await,
            Operation::Upsert => self.upsert(policies, ctx, &entity, &key, req.body.as_ref(), true, deadline).await,
            Operation::UpsertIncremental => {
                self.upsert(policies, ctx, &entity, &key, req.body.as_ref(), false, deadline).await
            }
            Operation::Delete => self.delete(policies, ctx, &entity, &key, deadline).await,
        }
    }

    fn deadline(&self, ctx: &RequestContext) -> Deadline {
        let now = Instant::now();
        match ctx.deadline {
            Some(at) => Deadline {
                at,
                budget: at.saturating_duration_since(now),
            },
            None => {
                let budget = Duration::from_millis(self.database.statement_timeout_ms);
                Deadline { at: now + budget, budget }
            }
        }
    }

    async fn bounded<T>(&self, deadline: Deadline, fut: impl Future<Output = Result<T, DbError>>) -> Result<T, DbError> {
        match tokio::time::timeout_at(deadline.at, fut).await {
            Ok(r) => r,
            Err(_) => Err(DbError::Timeout(deadline.budget)),
        }
    }

    /// Retries transient failures; anything else is returned as is.
    async fn fetch(&self, stmt: &QueryBuf, deadline: Deadline) -> Result<Vec<Row>, DbError> {
        let mut attempt = 0u32;
        loop {
            match self.bounded(deadline, self.executor.fetch_all(stmt)).await {
                Err(e) if e.is_transient() && attempt < self.database.max_retries => {
                    attempt += 1;
                    tracing::warn!(attempt, error = %e, "transient database error, retrying read");
                    tokio::time::sleep(Duration::from_millis(50 * attempt as u64)).await;
                }
                other => return other,
            }
        }
    }

    async fn begin(&self, deadline: Deadline) -> Result<Box<dyn DbTransaction>, DbError> {
        let mut attempt = 0u32;
        loop {
            match self.bounded(deadline, self.executor.begin()).await {
                Err(e) if e.is_transient() && attempt < self.database.max_retries => {
                    attempt += 1;
                    tracing::warn!(attempt, error = %e, "transient database error, retrying begin");
                    tokio::time::sleep(Duration::from_millis(50 * attempt as u64)).await;
                }
                other => return other,
            }
        }
    }

    /// Commit on success, roll back on failure.
    async fn finish<T>(
        &self,
        tx: Box<dyn DbTransaction>,
        outcome: Result<T, EngineError>,
        deadline: Deadline,
    ) -> Result<T, EngineError> {
        match outcome {
            Ok(v) => {
                self.bounded(deadline, tx.commit()).await?;
                Ok(v)
            }
            Err(e) => {
                if let Err(re) = self.bounded(deadline, tx.rollback()).await {
                    tracing::warn!(error = %re, "rollback failed");
                }
                Err(e)
            }
        }
    }

    async fn find(
        &self,
        policies: &PolicySet,
        ctx: &RequestContext,
        entity: &EntityDescriptor,
        key: &PrimaryKeyRoute,
        options: &QueryOptions,
        deadline: Deadline,
    ) -> Result<EngineResponse, EngineError> {
        if !key.is_empty() && options.has_pagination() {
            return Err(EngineError::BadRequest(
                "$first, $after and $orderby apply to collection reads only".into(),
            ));
        }
        let projection = match &options.select {
            Some(text) => parse_select(entity, text)?,
            None => policies.allowed_columns(&ctx.role, entity, Action::Read).unwrap_or_default(),
        };
        let filter = request_filter(entity, options)?;
        let requested_order = match &options.order_by {
            Some(text) => parse_order_by(entity, text)?,
            None => Vec::new(),
        };

        let mut requested: Vec<&str> = projection.iter().map(String::as_str).collect();
        if let Some(f) = &filter {
            requested.extend(f.referenced_fields());
        }
        requested.extend(requested_order.iter().map(|o| o.column.as_str()));
        requested.extend(entity.primary_key.iter().map(String::as_str));
        let allowed = policies.authorize(ctx, entity, Action::Read, requested)?;

        let filter = filter
            .map(|f| compile_filter(entity, &f, &ctx.claims))
            .transpose()?;

        if !key.is_empty() {
            let key_pred = compile_primary_key(entity, key)?;
            let caller = PredicateNode::all(std::iter::once(key_pred).chain(filter).collect());
            let predicate = PredicateNode::with_row_filter(caller, allowed.row_filter);
            let stmt = sql::select(entity, &projection, predicate.as_ref(), &[], None);
            let mut rows = self.fetch(&stmt, deadline).await?;
            return match rows.pop() {
                Some(row) if rows.is_empty() => Ok(EngineResponse::Row(row)),
                Some(_) => Err(EngineError::Database(DbError::Other(
                    "primary key lookup matched more than one row".into(),
                ))),
                None => Err(EngineError::EntityNotFound(format!(
                    "{}/{}",
                    entity.name,
                    key.pairs
                        .iter()
                        .map(|(c, v)| format!("{}/{}", c, v))
                        .collect::<Vec<_>>()
                        .join("/")
                ))),
            };
        }

        let order = stable_ordering(entity, requested_order);
        let size = page_size(options.first, &self.rest)?;
        let continuation = match &options.after {
            Some(token) => match continuation_predicate(entity, &order, token)? {
                Some(p) => Some(p),
                None => {
                    return Ok(EngineResponse::Rows {
                        items: Vec::new(),
                        after: None,
                    })
                }
            },
            None => None,
        };
        let caller = PredicateNode::all(filter.into_iter().chain(continuation).collect());
        let predicate = PredicateNode::with_row_filter(caller, allowed.row_filter);

        let mut fetched = projection.clone();
        for o in &order {
            if !fetched.contains(&o.column) {
                fetched.push(o.column.clone());
            }
        }
        let stmt = sql::select(entity, &fetched, predicate.as_ref(), &order, Some(u64::from(size) + 1));
        let mut rows = self.fetch(&stmt, deadline).await?;

        let after = if rows.len() > size as usize {
            rows.truncate(size as usize);
            rows.last().map(|last| encode_token(&order, last))
        } else {
            None
        };
        let items = rows.into_iter().map(|r| project(r, &projection)).collect();
        Ok(EngineResponse::Rows { items, after })
    }

    async fn insert(
        &self,
        policies: &PolicySet,
        ctx: &RequestContext,
        entity: &EntityDescriptor,
        body: Option<&Value>,
        deadline: Deadline,
    ) -> Result<EngineResponse, EngineError> {
        let payload = PayloadValidator::object(body)?;
        check_fields(entity, payload)?;
        let allowed = policies.authorize(ctx, entity, Action::Create, payload.keys().map(String::as_str))?;

        let values = PayloadValidator::coerce(entity, payload)?;
        PayloadValidator::require_insert_columns(entity, &values)?;
        let (returning, visible) = write_projection(policies, ctx, entity);

        let mut tx = self.begin(deadline).await?;
        let outcome = self
            .insert_in(tx.as_mut(), entity, &values, &returning, allowed.row_filter, deadline)
            .await;
        let row = self.finish(tx, outcome, deadline).await?;
        Ok(EngineResponse::Created(project(row, &visible)))
    }

    async fn insert_in(
        &self,
        tx: &mut dyn DbTransaction,
        entity: &EntityDescriptor,
        values: &[(String, DbParameter)],
        returning: &[String],
        row_filter: Option<PredicateNode>,
        deadline: Deadline,
    ) -> Result<Row, EngineError> {
        let stmt = sql::insert(entity, values, returning);
        let row = self
            .bounded(deadline, tx.fetch_all(&stmt))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DbError::Other("insert returned no row".into()))?;
        if let Some(rf) = row_filter {
            let key = key_from_row(entity, &row)?;
            let check = PredicateNode::with_row_filter(Some(key), Some(rf));
            if let Some(check) = check {
                let rows = self.bounded(deadline, tx.fetch_all(&sql::exists(entity, &check))).await?;
                if rows.is_empty() {
                    tracing::debug!(entity = %entity.name, "inserted row fails create row filter");
                    return Err(EngineError::Forbidden);
                }
            }
        }
        Ok(row)
    }

    async fn update(
        &self,
        policies: &PolicySet,
        ctx: &RequestContext,
        entity: &EntityDescriptor,
        key: &PrimaryKeyRoute,
        body: Option<&Value>,
        deadline: Deadline,
    ) -> Result<EngineResponse, EngineError> {
        let payload = PayloadValidator::object(body)?;
        check_fields(entity, payload)?;
        let allowed = policies.authorize(ctx, entity, Action::Update, payload.keys().map(String::as_str))?;

        let key_pred = compile_primary_key(entity, key)?;
        let values = PayloadValidator::coerce(entity, payload)?;
        let sets = PayloadValidator::strip_key(&key_pred, values)?;
        let (returning, visible) = write_projection(policies, ctx, entity);
        let predicate = PredicateNode::with_row_filter(Some(key_pred), allowed.row_filter);
        let Some(predicate) = predicate else {
            return Err(EngineError::InvalidField(entity.name.clone()));
        };
        let stmt = sql::update(entity, &sets, &predicate, &returning);

        let mut tx = self.begin(deadline).await?;
        let outcome = async {
            let rows = self.bounded(deadline, tx.fetch_all(&stmt)).await?;
            rows.into_iter()
                .next()
                .ok_or_else(|| EngineError::EntityNotFound(entity.name.clone()))
        }
        .await;
        let row = self.finish(tx, outcome, deadline).await?;
        Ok(EngineResponse::Row(project(row, &visible)))
    }

    #[allow(clippy::too_many_arguments)]
    async fn upsert(
        &self,
        policies: &PolicySet,
        ctx: &RequestContext,
        entity: &EntityDescriptor,
        key: &PrimaryKeyRoute,
        body: Option<&Value>,
        replace: bool,
        deadline: Deadline,
    ) -> Result<EngineResponse, EngineError> {
        let payload = PayloadValidator::object(body)?;
        check_fields(entity, payload)?;
        let update_allowed = policies.authorize(ctx, entity, Action::Update, payload.keys().map(String::as_str))?;
        let create_allowed = policies.authorize(
            ctx,
            entity,
            Action::Create,
            payload
                .keys()
                .map(String::as_str)
                .chain(entity.primary_key.iter().map(String::as_str)),
        )?;

        let key_pred = compile_primary_key(entity, key)?;
        let values = PayloadValidator::coerce(entity, payload)?;
        let mut sets = PayloadValidator::strip_key(&key_pred, values)?;
        let mut insert_values = PayloadValidator::key_values(&key_pred);
        insert_values.extend(sets.iter().cloned());
        if replace {
            let writable = policies.allowed_columns(&ctx.role, entity, Action::Update).unwrap_or_default();
            PayloadValidator::null_fill(entity, &mut sets, &writable);
        }
        let (returning, visible) = write_projection(policies, ctx, entity);

        let mut tx = self.begin(deadline).await?;
        let outcome = async {
            let probe = sql::probe_for_update(entity, &key_pred);
            let exists = !self.bounded(deadline, tx.fetch_all(&probe)).await?.is_empty();
            if exists {
                let predicate = PredicateNode::with_row_filter(Some(key_pred.clone()), update_allowed.row_filter)
                    .unwrap_or_else(|| key_pred.clone());
                let stmt = sql::update(entity, &sets, &predicate, &returning);
                let row = self.bounded(deadline, tx.fetch_all(&stmt)).await?.into_iter().next();
                match row {
                    Some(row) => Ok((row, false)),
                    None => {
                        tracing::debug!(entity = %entity.name, "existing row fails update row filter");
                        Err(EngineError::Forbidden)
                    }
                }
            } else {
                if entity.primary_key.iter().any(|k| entity.column(k).is_some_and(|c| c.is_generated)) {
                    return Err(EngineError::BadRequest(format!(
                        "no {} row with this key to update, and its key is generated by the database",
                        entity.name
                    )));
                }
                PayloadValidator::require_insert_columns(entity, &insert_values)?;
                let row = self
                    .insert_in(
                        tx.as_mut(),
                        entity,
                        &insert_values,
                        &returning,
                        create_allowed.row_filter,
                        deadline,
                    )
                    .await?;
                Ok((row, true))
            }
        }
        .await;
        let (row, created) = self.finish(tx, outcome, deadline).await?;
        let row = project(row, &visible);
        Ok(if created {
            EngineResponse::Created(row)
        } else {
            EngineResponse::Row(row)
        })
    }

    async fn delete(
        &self,
        policies: &PolicySet,
        ctx: &RequestContext,
        entity: &EntityDescriptor,
        key: &PrimaryKeyRoute,
        deadline: Deadline,
    ) -> Result<EngineResponse, EngineError> {
        let Allowed { row_filter } = policies.authorize(ctx, entity, Action::Delete, std::iter::empty())?;
        let key_pred = compile_primary_key(entity, key)?;
        let Some(predicate) = PredicateNode::with_row_filter(Some(key_pred), row_filter) else {
            return Err(EngineError::InvalidField(entity.name.clone()));
        };
        let stmt = sql::delete(entity, &predicate);

        let mut tx = self.begin(deadline).await?;
        let outcome = async {
            let affected = self.bounded(deadline, tx.execute(&stmt)).await?;
            if affected == 0 {
                Err(EngineError::EntityNotFound(entity.name.clone()))
            } else {
                Ok(())
            }
        }
        .await;
        self.finish(tx, outcome, deadline).await?;
        Ok(EngineResponse::Deleted)
    }
}

/// `$select=a,b`: known columns, no duplicates, in the order given.
fn parse_select(entity: &EntityDescriptor, text: &str) -> Result<Vec<String>, EngineError> {
    let mut out: Vec<String> = Vec::new();
    for item in text.split(',') {
        let name = item.trim();
        if name.is_empty() {
            return Err(EngineError::BadRequest(format!("invalid $select: '{}'", text)));
        }
        if !entity.has_column(name) {
            return Err(EngineError::InvalidField(format!("{} is not a field of {}", name, entity.name)));
        }
        if !out.iter().any(|c| c == name) {
            out.push(name.to_string());
        }
    }
    Ok(out)
}

/// `$filter` text and the structured filter object, ANDed when both are given.
fn request_filter(entity: &EntityDescriptor, options: &QueryOptions) -> Result<Option<FilterExpr>, EngineError> {
    let text = options.filter.as_deref().map(parse_filter).transpose()?;
    let object = match &options.graphql_filter {
        Some(v) => parse_graphql_filter(v)?,
        None => None,
    };
    let expr = match (text, object) {
        (Some(a), Some(b)) => Some(FilterExpr::And(vec![a, b])),
        (a, b) => a.or(b),
    };
    if let Some(e) = &expr {
        if let Some(unknown) = e.referenced_fields().into_iter().find(|f| !entity.has_column(f)) {
            return Err(EngineError::InvalidField(format!("{} is not a field of {}", unknown, entity.name)));
        }
    }
    Ok(expr)
}

fn check_fields(entity: &EntityDescriptor, payload: &Map<String, Value>) -> Result<(), EngineError> {
    match payload.keys().find(|k| !entity.has_column(k)) {
        Some(unknown) => Err(EngineError::InvalidField(format!("{} is not a field of {}", unknown, entity.name))),
        None => Ok(()),
    }
}

/// Columns a write returns: what the role may read, or only the key when it may not read.
/// The first list adds key columns needed internally; the second is what the caller sees.
fn write_projection(policies: &PolicySet, ctx: &RequestContext, entity: &EntityDescriptor) -> (Vec<String>, Vec<String>) {
    let visible = policies
        .allowed_columns(&ctx.role, entity, Action::Read)
        .filter(|cols| !cols.is_empty())
        .unwrap_or_else(|| entity.primary_key.clone());
    let mut returning = visible.clone();
    for k in &entity.primary_key {
        if !returning.contains(k) {
            returning.push(k.clone());
        }
    }
    (returning, visible)
}

fn project(mut row: Row, columns: &[String]) -> Row {
    row.retain(|k, _| columns.iter().any(|c| c == k));
    row
}

/// Key equality for a row returned by the database.
fn key_from_row(entity: &EntityDescriptor, row: &Row) -> Result<PredicateNode, EngineError> {
    let mut children = Vec::with_capacity(entity.primary_key.len());
    for k in &entity.primary_key {
        let column = entity
            .column(k)
            .ok_or_else(|| DbError::Other(format!("key column {} missing from descriptor", k)))?;
        let raw = row.get(k).unwrap_or(&Value::Null);
        let value = coerce_json(raw, column.column_type)
            .or_else(|| raw.as_str().and_then(|s| coerce_text(s, column.column_type)))
            .ok_or_else(|| DbError::Other(format!("returned key column {} could not be read", k)))?;
        children.push(PredicateNode::compare(
            k.clone(),
            ComparisonOp::Eq,
            DbParameter::new(value, column.storage_type.clone()),
        ));
    }
    PredicateNode::all(children).ok_or_else(|| EngineError::from(DbError::Other("entity has no key".into())))
}
