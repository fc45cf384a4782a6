//! Permission rules resolved against the catalog at load time.

use crate::auth::{Action, RequestContext};
use crate::config::{ActionConfig, ActionKind, RuntimeConfig};
use crate::error::{ConfigError, EngineError};
use crate::filter::{compile_filter, parse_policy, FilterExpr, PredicateNode};
use crate::metadata::{EntityDescriptor, MetadataCatalog};
use std::collections::{BTreeSet, HashMap};

/// Row filter in its load-time form.
#[derive(Clone, Debug)]
enum RowFilter {
    /// No claims referenced: compiled once.
    Static(PredicateNode),
    /// Claims are substituted per request.
    Claims(FilterExpr),
}

#[derive(Clone, Debug)]
struct ActionRule {
    columns: BTreeSet<String>,
    row_filter: Option<RowFilter>,
}

/// Result of a successful check.
#[derive(Clone, Debug, PartialEq)]
pub struct Allowed {
    /// Must be ANDed outermost into every statement the request issues.
    pub row_filter: Option<PredicateNode>,
}

/// entity -> role -> action -> rule. Read-only after [`PolicySet::build`].
#[derive(Clone, Debug, Default)]
pub struct PolicySet {
    rules: HashMap<String, HashMap<String, HashMap<Action, ActionRule>>>,
}

fn expand(kind: ActionKind) -> Vec<Action> {
    match kind {
        ActionKind::Create => vec![Action::Create],
        ActionKind::Read => vec![Action::Read],
        ActionKind::Update => vec![Action::Update],
        ActionKind::Delete => vec![Action::Delete],
        ActionKind::All => Action::ALL.to_vec(),
    }
}

impl PolicySet {
    /// Resolve every configured permission against the catalog. Unknown columns, unparsable
    /// row filters, and duplicate (role, action) entries are configuration errors.
    pub fn build(config: &RuntimeConfig, catalog: &dyn MetadataCatalog) -> Result<Self, ConfigError> {
        let mut rules: HashMap<String, HashMap<String, HashMap<Action, ActionRule>>> = HashMap::new();
        for ec in &config.entities {
            let entity = catalog.resolve_entity(&ec.name).ok_or_else(|| ConfigError::MissingReference {
                kind: "entity",
                id: ec.name.clone(),
            })?;
            let by_role = rules.entry(ec.name.clone()).or_default();
            for perm in &ec.permissions {
                let by_action = by_role.entry(perm.role.clone()).or_default();
                for ac in &perm.actions {
                    let rule = resolve_rule(&entity, ac)?;
                    for action in expand(ac.action) {
                        if by_action.insert(action, rule.clone()).is_some() {
                            return Err(ConfigError::InvalidPolicy {
                                entity: ec.name.clone(),
                                message: format!(
                                    "action '{}' declared more than once for role '{}'",
                                    action.as_str(),
                                    perm.role
                                ),
                            });
                        }
                    }
                }
            }
        }
        for name in catalog.entity_names() {
            if !rules.contains_key(&name) {
                tracing::warn!(entity = %name, "entity has no permissions; every request for it is forbidden");
            }
        }
        let count: usize = rules.values().flat_map(|r| r.values()).map(|a| a.len()).sum();
        tracing::info!(entities = rules.len(), rules = count, "authorization policy built");
        Ok(PolicySet { rules })
    }

    fn rule(&self, role: &str, entity: &str, action: Action) -> Option<&ActionRule> {
        self.rules.get(entity)?.get(role)?.get(&action)
    }

    /// Columns the role may touch for `action`, in entity column order.
    pub fn allowed_columns(&self, role: &str, entity: &EntityDescriptor, action: Action) -> Option<Vec<String>> {
        let rule = self.rule(role, &entity.name, action)?;
        Some(
            entity
                .column_names()
                .filter(|c| rule.columns.contains(*c))
                .map(str::to_string)
                .collect(),
        )
    }

    /// Whether the role holds `action` on the entity at all. Runs before any field of the
    /// request is looked up, so a role without an entry learns nothing about the columns.
    pub fn permit(&self, ctx: &RequestContext, entity: &EntityDescriptor, action: Action) -> Result<(), EngineError> {
        if self.rule(&ctx.role, &entity.name, action).is_some() {
            Ok(())
        } else {
            tracing::debug!(role = %ctx.role, entity = %entity.name, action = action.as_str(), "no permission entry");
            Err(EngineError::Forbidden)
        }
    }

    /// Check (role, entity, action, columns). Any miss is [`EngineError::Forbidden`].
    pub fn authorize<'a>(
        &self,
        ctx: &RequestContext,
        entity: &EntityDescriptor,
        action: Action,
        requested: impl IntoIterator<Item = &'a str>,
    ) -> Result<Allowed, EngineError> {
        let Some(rule) = self.rule(&ctx.role, &entity.name, action) else {
            tracing::debug!(role = %ctx.role, entity = %entity.name, action = action.as_str(), "no permission entry");
            return Err(EngineError::Forbidden);
        };
        for column in requested {
            if !rule.columns.contains(column) {
                tracing::debug!(
                    role = %ctx.role,
                    entity = %entity.name,
                    action = action.as_str(),
                    column,
                    "column not in allow-list"
                );
                return Err(EngineError::Forbidden);
            }
        }
        let row_filter = match &rule.row_filter {
            None => None,
            Some(RowFilter::Static(node)) => Some(node.clone()),
            Some(RowFilter::Claims(expr)) => match compile_filter(entity, expr, &ctx.claims) {
                Ok(node) => Some(node),
                Err(EngineError::Forbidden) => return Err(EngineError::Forbidden),
                Err(e) => {
                    tracing::debug!(role = %ctx.role, entity = %entity.name, error = %e, "row filter rejected claims");
                    return Err(EngineError::Forbidden);
                }
            },
        };
        Ok(Allowed { row_filter })
    }
}

fn resolve_rule(entity: &EntityDescriptor, ac: &ActionConfig) -> Result<ActionRule, ConfigError> {
    let invalid = |message: String| ConfigError::InvalidPolicy {
        entity: entity.name.clone(),
        message,
    };

    let mut columns: BTreeSet<String> = BTreeSet::new();
    match &ac.fields {
        None => columns.extend(entity.column_names().map(str::to_string)),
        Some(fields) => {
            for name in fields.include.iter().chain(fields.exclude.iter()) {
                if name != "*" && !entity.has_column(name) {
                    return Err(invalid(format!("unknown field '{}' in fields", name)));
                }
            }
            if fields.include.is_empty() || fields.include.iter().any(|n| n == "*") {
                columns.extend(entity.column_names().map(str::to_string));
            } else {
                columns.extend(fields.include.iter().cloned());
            }
            if fields.exclude.iter().any(|n| n == "*") {
                columns.clear();
            } else {
                for name in &fields.exclude {
                    columns.remove(name);
                }
            }
        }
    }

    let row_filter = match &ac.policy {
        None => None,
        Some(p) => {
            let expr = parse_policy(&p.database).map_err(|e| invalid(e.to_string()))?;
            if let Some(unknown) = expr.referenced_fields().into_iter().find(|f| !entity.has_column(f)) {
                return Err(invalid(format!("row filter references unknown field '{}'", unknown)));
            }
            if expr.uses_claims() {
                Some(RowFilter::Claims(expr))
            } else {
                let node = compile_filter(entity, &expr, &HashMap::new()).map_err(|e| invalid(e.to_string()))?;
                Some(RowFilter::Static(node))
            }
        }
    };

    Ok(ActionRule { columns, row_filter })
}
