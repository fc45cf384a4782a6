//! Build the entity catalog by introspecting PostgreSQL `information_schema`.

use crate::config::{is_identifier, RuntimeConfig};
use crate::error::ConfigError;
use crate::metadata::{ColumnDescriptor, ColumnType, EntityCatalog, EntityDescriptor, RelationshipDescriptor};
use sqlx::PgPool;
use std::collections::{BTreeMap, HashMap};

const TABLE_KIND_SQL: &str = "SELECT table_type::text FROM information_schema.tables \
     WHERE table_schema = $1 AND table_name = $2";

const COLUMNS_SQL: &str = "SELECT column_name::text, udt_name::text, is_nullable::text, column_default::text, is_identity::text, is_generated::text \
     FROM information_schema.columns \
     WHERE table_schema = $1 AND table_name = $2 \
     ORDER BY ordinal_position";

const PRIMARY_KEY_SQL: &str = "SELECT kcu.column_name::text \
     FROM information_schema.table_constraints tc \
     JOIN information_schema.key_column_usage kcu \
       ON kcu.constraint_name = tc.constraint_name AND kcu.table_schema = tc.table_schema \
     WHERE tc.constraint_type = 'PRIMARY KEY' AND tc.table_schema = $1 AND tc.table_name = $2 \
     ORDER BY kcu.ordinal_position";

const FOREIGN_KEYS_SQL: &str = "SELECT tc.constraint_name::text, kcu.column_name::text, ccu.table_schema::text, ccu.table_name::text, ccu.column_name::text \
     FROM information_schema.table_constraints tc \
     JOIN information_schema.key_column_usage kcu \
       ON kcu.constraint_name = tc.constraint_name AND kcu.table_schema = tc.table_schema \
     JOIN information_schema.constraint_column_usage ccu \
       ON ccu.constraint_name = tc.constraint_name AND ccu.constraint_schema = tc.table_schema \
     WHERE tc.constraint_type = 'FOREIGN KEY' AND tc.table_schema = $1 AND tc.table_name = $2 \
     ORDER BY tc.constraint_name, kcu.ordinal_position";

type ColumnRow = (String, String, String, Option<String>, String, String);
type ForeignKeyRow = (String, String, String, String, String);

/// Introspect every configured entity. Fails if a source object is missing or has no usable key.
pub async fn build_catalog(pool: &PgPool, config: &RuntimeConfig) -> Result<EntityCatalog, ConfigError> {
    // (schema, table) -> entity name, for resolving foreign-key targets.
    let entity_by_source: HashMap<(String, String), String> = config
        .entities
        .iter()
        .map(|e| {
            let schema = e.source.schema.clone().unwrap_or_else(|| config.database.schema.clone());
            ((schema, e.source.object.clone()), e.name.clone())
        })
        .collect();

    let mut descriptors = Vec::with_capacity(config.entities.len());
    for e in &config.entities {
        let schema = e.source.schema.as_deref().unwrap_or(&config.database.schema);
        let table = e.source.object.as_str();

        let kind: Option<String> = sqlx::query_scalar(TABLE_KIND_SQL)
            .bind(schema)
            .bind(table)
            .fetch_optional(pool)
            .await?;
        let Some(kind) = kind else {
            return Err(ConfigError::MissingReference {
                kind: "table or view",
                id: format!("{}.{}", schema, table),
            });
        };

        let rows: Vec<ColumnRow> = sqlx::query_as(COLUMNS_SQL)
            .bind(schema)
            .bind(table)
            .fetch_all(pool)
            .await?;
        let columns: Vec<ColumnDescriptor> = rows.into_iter().map(column_from_row).collect();

        let declared_pk: Vec<String> = sqlx::query_scalar(PRIMARY_KEY_SQL)
            .bind(schema)
            .bind(table)
            .fetch_all(pool)
            .await?;
        let primary_key = if e.source.key_fields.is_empty() {
            declared_pk
        } else {
            e.source.key_fields.clone()
        };
        if primary_key.is_empty() {
            return Err(ConfigError::InvalidPrimaryKey {
                entity: e.name.clone(),
                column: "<none declared; set source.key_fields>".into(),
            });
        }

        let fk_rows: Vec<ForeignKeyRow> = sqlx::query_as(FOREIGN_KEYS_SQL)
            .bind(schema)
            .bind(table)
            .fetch_all(pool)
            .await?;
        let relationships = relationships_from_rows(fk_rows, &entity_by_source);

        let mut descriptor = EntityDescriptor::new(e.name.clone(), schema, table, columns, primary_key)
            .with_relationships(relationships);
        if kind.eq_ignore_ascii_case("VIEW") {
            descriptor = descriptor.view();
        }
        tracing::debug!(
            entity = %descriptor.name,
            table = %format!("{}.{}", schema, table),
            columns = descriptor.columns.len(),
            "entity introspected"
        );
        descriptors.push(descriptor);
    }

    let catalog = EntityCatalog::from_descriptors(descriptors)?;
    tracing::info!(entities = catalog.len(), "metadata catalog built");
    Ok(catalog)
}

fn column_from_row(row: ColumnRow) -> ColumnDescriptor {
    let (name, udt, is_nullable, default, is_identity, is_generated) = row;
    let serial = default.as_deref().map(|d| d.starts_with("nextval(")).unwrap_or(false);
    let mut c = ColumnDescriptor::new(name, ColumnType::from_pg_udt(&udt));
    // udt names end up in placeholder casts; anything unusual is bound uncast.
    if is_identifier(&udt) {
        c = c.storage(udt);
    }
    c.nullable = is_nullable.eq_ignore_ascii_case("YES");
    c.has_default = default.is_some();
    if is_identity.eq_ignore_ascii_case("YES") || is_generated.eq_ignore_ascii_case("ALWAYS") || serial {
        c = c.generated();
    }
    c
}

/// Group FK rows by constraint; keep only those whose target is a configured entity.
fn relationships_from_rows(
    rows: Vec<ForeignKeyRow>,
    entity_by_source: &HashMap<(String, String), String>,
) -> Vec<RelationshipDescriptor> {
    let mut by_constraint: BTreeMap<String, RelationshipDescriptor> = BTreeMap::new();
    for (constraint, column, target_schema, target_table, target_column) in rows {
        let Some(target_entity) = entity_by_source.get(&(target_schema, target_table)) else {
            continue;
        };
        let rel = by_constraint
            .entry(constraint.clone())
            .or_insert_with(|| RelationshipDescriptor {
                name: constraint,
                columns: Vec::new(),
                target_entity: target_entity.clone(),
                target_columns: Vec::new(),
            });
        if !rel.columns.contains(&column) {
            rel.columns.push(column);
        }
        if !rel.target_columns.contains(&target_column) {
            rel.target_columns.push(target_column);
        }
    }
    by_constraint.into_values().collect()
}
