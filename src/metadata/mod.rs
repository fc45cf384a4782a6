//! Metadata catalog: configured entity identifier -> schema description.

mod descriptor;
pub mod introspect;

pub use descriptor::*;
pub use introspect::build_catalog;

use crate::error::ConfigError;
use std::collections::HashMap;
use std::sync::Arc;

/// Read-only lookup of entity descriptors by configured identifier.
pub trait MetadataCatalog: Send + Sync {
    fn resolve_entity(&self, identifier: &str) -> Option<Arc<EntityDescriptor>>;

    fn entity_names(&self) -> Vec<String>;
}

/// Map-backed catalog snapshot. Never mutated after construction.
#[derive(Clone, Debug, Default)]
pub struct EntityCatalog {
    by_name: HashMap<String, Arc<EntityDescriptor>>,
}

impl EntityCatalog {
    pub fn from_descriptors(
        descriptors: impl IntoIterator<Item = EntityDescriptor>,
    ) -> Result<Self, ConfigError> {
        let mut by_name = HashMap::new();
        for d in descriptors {
            if d.primary_key.is_empty() {
                return Err(ConfigError::InvalidPrimaryKey {
                    entity: d.name.clone(),
                    column: String::new(),
                });
            }
            if let Some(missing) = d.primary_key.iter().find(|k| !d.has_column(k)) {
                return Err(ConfigError::InvalidPrimaryKey {
                    entity: d.name.clone(),
                    column: missing.clone(),
                });
            }
            let name = d.name.clone();
            if by_name.insert(name.clone(), Arc::new(d)).is_some() {
                return Err(ConfigError::DuplicateEntity(name));
            }
        }
        Ok(EntityCatalog { by_name })
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

impl MetadataCatalog for EntityCatalog {
    fn resolve_entity(&self, identifier: &str) -> Option<Arc<EntityDescriptor>> {
        self.by_name.get(identifier).cloned()
    }

    fn entity_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.by_name.keys().cloned().collect();
        names.sort();
        names
    }
}
