//! Raw runtime config types matching the gateway JSON file.

use serde::{Deserialize, Deserializer, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RestConfig {
    #[serde(default = "default_rest_path")]
    pub path: String,
    #[serde(default = "default_page_size")]
    pub default_page_size: u32,
    #[serde(default = "default_max_page_size")]
    pub max_page_size: u32,
    /// Whole-request deadline handed to the engine by the HTTP layer.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_rest_path() -> String {
    "/api".into()
}

fn default_page_size() -> u32 {
    100
}

fn default_max_page_size() -> u32 {
    100_000
}

fn default_request_timeout_ms() -> u64 {
    60_000
}

impl Default for RestConfig {
    fn default() -> Self {
        RestConfig {
            path: default_rest_path(),
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Schema used when an entity source omits one.
    #[serde(default = "default_schema")]
    pub schema: String,
    #[serde(default = "default_statement_timeout_ms")]
    pub statement_timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_schema() -> String {
    "public".into()
}

fn default_statement_timeout_ms() -> u64 {
    30_000
}

fn default_max_retries() -> u32 {
    2
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            schema: default_schema(),
            statement_timeout_ms: default_statement_timeout_ms(),
            max_retries: default_max_retries(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Physical table or view name.
    pub object: String,
    #[serde(default)]
    pub schema: Option<String>,
    /// Key columns for views or tables without a declared primary key.
    #[serde(default)]
    pub key_fields: Vec<String>,
}

/// `"create" | "read" | "update" | "delete" | "*"`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum ActionKind {
    Create,
    Read,
    Update,
    Delete,
    All,
}

impl<'de> Deserialize<'de> for ActionKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        match s.to_lowercase().as_str() {
            "create" => Ok(ActionKind::Create),
            "read" => Ok(ActionKind::Read),
            "update" => Ok(ActionKind::Update),
            "delete" => Ok(ActionKind::Delete),
            "*" => Ok(ActionKind::All),
            other => Err(serde::de::Error::custom(format!(
                "action must be one of create, read, update, delete, *; got '{}'",
                other
            ))),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FieldsConfig {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Row filter in `$filter` syntax; `@item.col` and `@claims.name` are allowed.
    pub database: String,
}

/// An action is either a bare string (`"read"`) or an object with fields and policy.
#[derive(Clone, Debug, Serialize)]
pub struct ActionConfig {
    pub action: ActionKind,
    pub fields: Option<FieldsConfig>,
    pub policy: Option<PolicyConfig>,
}

impl<'de> Deserialize<'de> for ActionConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Full {
            action: ActionKind,
            #[serde(default)]
            fields: Option<FieldsConfig>,
            #[serde(default)]
            policy: Option<PolicyConfig>,
        }

        let v = serde_json::Value::deserialize(deserializer)?;
        match v {
            serde_json::Value::String(_) => {
                let action = ActionKind::deserialize(v).map_err(serde::de::Error::custom)?;
                Ok(ActionConfig {
                    action,
                    fields: None,
                    policy: None,
                })
            }
            serde_json::Value::Object(_) => {
                let full = Full::deserialize(v).map_err(serde::de::Error::custom)?;
                Ok(ActionConfig {
                    action: full.action,
                    fields: full.fields,
                    policy: full.policy,
                })
            }
            _ => Err(serde::de::Error::custom(
                "action must be a string or { \"action\": ..., \"fields\": ..., \"policy\": ... }",
            )),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PermissionConfig {
    pub role: String,
    pub actions: Vec<ActionConfig>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EntityConfig {
    /// Identifier used in routes; may differ from `source.object`.
    pub name: String,
    pub source: SourceConfig,
    #[serde(default)]
    pub permissions: Vec<PermissionConfig>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub rest: RestConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub entities: Vec<EntityConfig>,
}

impl RuntimeConfig {
    pub fn entity(&self, name: &str) -> Option<&EntityConfig> {
        self.entities.iter().find(|e| e.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actions_accept_string_and_object_forms() {
        let json = r#"{
            "entities": [{
                "name": "Book",
                "source": { "object": "books" },
                "permissions": [{
                    "role": "anonymous",
                    "actions": [
                        "read",
                        { "action": "update", "fields": { "include": ["title"] },
                          "policy": { "database": "@item.id gt 1" } }
                    ]
                }]
            }]
        }"#;
        let config: RuntimeConfig = serde_json::from_str(json).unwrap();
        let actions = &config.entities[0].permissions[0].actions;
        assert_eq!(actions[0].action, ActionKind::Read);
        assert!(actions[0].fields.is_none());
        assert_eq!(actions[1].action, ActionKind::Update);
        assert_eq!(actions[1].policy.as_ref().map(|p| p.database.as_str()), Some("@item.id gt 1"));
        assert_eq!(config.rest.path, "/api");
        assert_eq!(config.database.schema, "public");
    }

    #[test]
    fn unknown_action_is_rejected() {
        let json = r#"{ "role": "r", "actions": ["execute"] }"#;
        assert!(serde_json::from_str::<PermissionConfig>(json).is_err());
    }
}
