//! Route parsing: `{base}/{entity}/{col}/{val}/...` -> entity identifier and primary-key route.

use crate::error::EngineError;

/// Ordered `(column, raw value)` pairs from a primary-key route segment.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PrimaryKeyRoute {
    pub pairs: Vec<(String, String)>,
}

impl PrimaryKeyRoute {
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.pairs.iter().map(|(c, _)| c.as_str())
    }
}

/// Split `route` (no leading `/`) into entity identifier and the remaining key route.
///
/// `base_path` is the configured REST path; surrounding `/` are ignored, so base
/// `/rest-api` accepts `rest-api/Book/id/1` -> (`Book`, `id/1`). A base of `/` or `""`
/// mounts entities at the root: `Book/id/1`.
pub fn parse_entity_and_key(base_path: &str, route: &str) -> Result<(String, String), EngineError> {
    let base = base_path.trim_matches('/');
    let after_base = if base.is_empty() {
        route
    } else {
        let prefix = format!("{}/", base);
        match route.strip_prefix(prefix.as_str()) {
            Some(rest) => rest,
            None => return Err(EngineError::InvalidRoute(route.to_string())),
        }
    };
    let (entity, key_route) = match after_base.split_once('/') {
        Some((entity, rest)) => (entity, rest),
        None => (after_base, ""),
    };
    if entity.is_empty() {
        return Err(EngineError::InvalidRoute(route.to_string()));
    }
    Ok((entity.to_string(), key_route.to_string()))
}

/// Parse `col1/val1/col2/val2`. An empty string is an empty route.
pub fn parse_primary_key_route(key_route: &str) -> Result<PrimaryKeyRoute, EngineError> {
    if key_route.is_empty() {
        return Ok(PrimaryKeyRoute::default());
    }
    let segments: Vec<&str> = key_route.split('/').collect();
    if segments.len() % 2 != 0 {
        return Err(EngineError::BadRequest(format!(
            "primary key route must be column/value pairs: {}",
            key_route
        )));
    }
    let mut pairs: Vec<(String, String)> = Vec::with_capacity(segments.len() / 2);
    for chunk in segments.chunks(2) {
        let (column, value) = (chunk[0], chunk[1]);
        if column.is_empty() || value.is_empty() {
            return Err(EngineError::BadRequest(format!(
                "primary key route has an empty segment: {}",
                key_route
            )));
        }
        if pairs.iter().any(|(c, _)| c == column) {
            return Err(EngineError::BadRequest(format!(
                "primary key column '{}' appears more than once in route: {}",
                column, key_route
            )));
        }
        pairs.push((column.to_string(), value.to_string()));
    }
    Ok(PrimaryKeyRoute { pairs })
}
