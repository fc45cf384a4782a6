//! Entity, column, and relationship descriptors resolved from the live schema.

use std::collections::HashMap;

/// Semantic type of a column; drives literal coercion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnType {
    String,
    Int,
    Float,
    Bool,
    DateTime,
    Binary,
    Uuid,
}

impl ColumnType {
    pub fn name(self) -> &'static str {
        match self {
            ColumnType::String => "string",
            ColumnType::Int => "int",
            ColumnType::Float => "float",
            ColumnType::Bool => "bool",
            ColumnType::DateTime => "datetime",
            ColumnType::Binary => "binary",
            ColumnType::Uuid => "uuid",
        }
    }

    /// Map a PostgreSQL udt name (e.g. `int4`, `timestamptz`) to a semantic type.
    pub fn from_pg_udt(udt: &str) -> Self {
        match udt {
            "int2" | "int4" | "int8" => ColumnType::Int,
            "float4" | "float8" | "numeric" | "money" => ColumnType::Float,
            "bool" => ColumnType::Bool,
            "timestamp" | "timestamptz" | "date" => ColumnType::DateTime,
            "bytea" => ColumnType::Binary,
            "uuid" => ColumnType::Uuid,
            _ => ColumnType::String,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ColumnDescriptor {
    pub name: String,
    pub column_type: ColumnType,
    /// Storage type used as the placeholder cast (`$n::int4`). Only catalog-sourced.
    pub storage_type: Option<String>,
    pub nullable: bool,
    pub is_primary_key: bool,
    /// Column has a DB default (e.g. NOW(), gen_random_uuid()).
    pub has_default: bool,
    /// Identity, generated-always, or serial columns; never accepted from callers.
    pub is_generated: bool,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        ColumnDescriptor {
            name: name.into(),
            column_type,
            storage_type: None,
            nullable: true,
            is_primary_key: false,
            has_default: false,
            is_generated: false,
        }
    }

    pub fn storage(mut self, storage_type: impl Into<String>) -> Self {
        self.storage_type = Some(storage_type.into());
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn with_default(mut self) -> Self {
        self.has_default = true;
        self
    }

    pub fn generated(mut self) -> Self {
        self.is_generated = true;
        self.has_default = true;
        self
    }

    /// A caller must supply this column on insert.
    pub fn is_required_on_insert(&self) -> bool {
        !self.nullable && !self.has_default && !self.is_generated
    }
}

/// Foreign key from this entity to another configured entity.
#[derive(Clone, Debug, PartialEq)]
pub struct RelationshipDescriptor {
    pub name: String,
    pub columns: Vec<String>,
    pub target_entity: String,
    pub target_columns: Vec<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EntityDescriptor {
    pub name: String,
    pub schema_name: String,
    pub table_name: String,
    pub is_view: bool,
    pub columns: Vec<ColumnDescriptor>,
    /// Non-empty, in key order.
    pub primary_key: Vec<String>,
    pub relationships: Vec<RelationshipDescriptor>,
    column_index: HashMap<String, usize>,
}

impl EntityDescriptor {
    /// Build a descriptor; marks `primary_key` columns on the column list.
    pub fn new(
        name: impl Into<String>,
        schema_name: impl Into<String>,
        table_name: impl Into<String>,
        mut columns: Vec<ColumnDescriptor>,
        primary_key: Vec<String>,
    ) -> Self {
        for c in columns.iter_mut() {
            c.is_primary_key = primary_key.contains(&c.name);
        }
        let column_index = columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.clone(), i))
            .collect();
        EntityDescriptor {
            name: name.into(),
            schema_name: schema_name.into(),
            table_name: table_name.into(),
            is_view: false,
            columns,
            primary_key,
            relationships: Vec::new(),
            column_index,
        }
    }

    pub fn view(mut self) -> Self {
        self.is_view = true;
        self
    }

    pub fn with_relationships(mut self, relationships: Vec<RelationshipDescriptor>) -> Self {
        self.relationships = relationships;
        self
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.column_index.get(name).map(|&i| &self.columns[i])
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index.contains_key(name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn is_primary_key(&self, name: &str) -> bool {
        self.primary_key.iter().any(|k| k == name)
    }
}

/// Closed set of metadata kinds handed out by the catalog.
#[derive(Clone, Copy, Debug)]
pub enum Metadata<'a> {
    Entity(&'a EntityDescriptor),
    Column(&'a ColumnDescriptor),
    Relationship(&'a RelationshipDescriptor),
}

impl<'a> Metadata<'a> {
    pub fn name(&self) -> &'a str {
        match self {
            Metadata::Entity(e) => &e.name,
            Metadata::Column(c) => &c.name,
            Metadata::Relationship(r) => &r.name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_key_columns_are_flagged() {
        let e = EntityDescriptor::new(
            "Book",
            "public",
            "books",
            vec![
                ColumnDescriptor::new("id", ColumnType::Int).not_null(),
                ColumnDescriptor::new("title", ColumnType::String),
            ],
            vec!["id".into()],
        );
        assert!(e.column("id").map(|c| c.is_primary_key).unwrap_or(false));
        assert!(!e.column("title").map(|c| c.is_primary_key).unwrap_or(true));
        assert!(e.column("missing").is_none());
    }

    #[test]
    fn udt_names_map_to_semantic_types() {
        assert_eq!(ColumnType::from_pg_udt("int8"), ColumnType::Int);
        assert_eq!(ColumnType::from_pg_udt("timestamptz"), ColumnType::DateTime);
        assert_eq!(ColumnType::from_pg_udt("varchar"), ColumnType::String);
        assert_eq!(ColumnType::from_pg_udt("uuid"), ColumnType::Uuid);
    }

    #[test]
    fn metadata_variants_report_names() {
        let c = ColumnDescriptor::new("title", ColumnType::String);
        assert_eq!(Metadata::Column(&c).name(), "title");
    }
}
