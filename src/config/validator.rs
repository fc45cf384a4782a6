//! Config validation: identifier shape, uniqueness, and permission consistency.

use crate::config::RuntimeConfig;
use crate::error::ConfigError;
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

fn identifier_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static regex"))
}

/// Entity names, tables, schemas, and columns must be plain identifiers.
pub fn is_identifier(s: &str) -> bool {
    identifier_re().is_match(s)
}

pub fn validate(config: &RuntimeConfig) -> Result<(), ConfigError> {
    let rest_path = config.rest.path.trim_matches('/');
    if rest_path.contains('/') || rest_path.chars().any(char::is_whitespace) {
        return Err(ConfigError::Validation(format!(
            "rest.path must be a single segment, got '{}'",
            config.rest.path
        )));
    }
    if config.rest.default_page_size == 0 || config.rest.default_page_size > config.rest.max_page_size {
        return Err(ConfigError::Validation(
            "rest.default_page_size must be between 1 and rest.max_page_size".into(),
        ));
    }
    if !is_identifier(&config.database.schema) {
        return Err(ConfigError::Validation(format!(
            "database.schema is not a valid identifier: {}",
            config.database.schema
        )));
    }

    let mut names = HashSet::new();
    for e in &config.entities {
        if !is_identifier(&e.name) {
            return Err(ConfigError::Validation(format!("entity name is not a valid identifier: {}", e.name)));
        }
        if !names.insert(e.name.as_str()) {
            return Err(ConfigError::DuplicateEntity(e.name.clone()));
        }
        if !is_identifier(&e.source.object) {
            return Err(ConfigError::Validation(format!(
                "entity {}: source.object is not a valid identifier: {}",
                e.name, e.source.object
            )));
        }
        if let Some(schema) = &e.source.schema {
            if !is_identifier(schema) {
                return Err(ConfigError::Validation(format!(
                    "entity {}: source.schema is not a valid identifier: {}",
                    e.name, schema
                )));
            }
        }
        for k in &e.source.key_fields {
            if !is_identifier(k) {
                return Err(ConfigError::InvalidPrimaryKey {
                    entity: e.name.clone(),
                    column: k.clone(),
                });
            }
        }

        let mut roles = HashSet::new();
        for p in &e.permissions {
            if p.role.trim().is_empty() {
                return Err(ConfigError::Validation(format!("entity {}: empty role name", e.name)));
            }
            if !roles.insert(p.role.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "entity {}: role {} is declared more than once",
                    e.name, p.role
                )));
            }
            for a in &p.actions {
                let Some(fields) = &a.fields else { continue };
                if fields.exclude.iter().any(|f| f == "*") && !fields.include.is_empty() {
                    return Err(ConfigError::Validation(format!(
                        "entity {}: role {} excludes '*' while also including fields",
                        e.name, p.role
                    )));
                }
                for f in fields.include.iter().chain(fields.exclude.iter()) {
                    if f != "*" && !is_identifier(f) {
                        return Err(ConfigError::Validation(format!(
                            "entity {}: role {}: invalid field name '{}'",
                            e.name, p.role, f
                        )));
                    }
                }
            }
        }
    }

    Ok(())
}
