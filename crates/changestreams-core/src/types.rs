use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Logical name of a tracked table.
///
/// The set is closed: server and client agree on it at compile time, so an
/// unknown name on the wire is a decode error, never a silent new group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityName {
    Companies,
    Projects,
    Screens,
    ScreenActions,
    Notes,
    Employees,
}

impl EntityName {
    pub const ALL: [EntityName; 6] = [
        EntityName::Companies,
        EntityName::Projects,
        EntityName::Screens,
        EntityName::ScreenActions,
        EntityName::Notes,
        EntityName::Employees,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityName::Companies => "Companies",
            EntityName::Projects => "Projects",
            EntityName::Screens => "Screens",
            EntityName::ScreenActions => "ScreenActions",
            EntityName::Notes => "Notes",
            EntityName::Employees => "Employees",
        }
    }
}

impl fmt::Display for EntityName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityName {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        EntityName::ALL
            .into_iter()
            .find(|e| e.as_str() == s)
            .ok_or_else(|| format!("unknown entity: {}", s))
    }
}

/// Row-level operation that fired the trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Insert => "INSERT",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "INSERT" => Ok(Operation::Insert),
            "UPDATE" => Ok(Operation::Update),
            "DELETE" => Ok(Operation::Delete),
            other => Err(format!("unknown operation: {}", other)),
        }
    }
}

/// One committed row mutation, as published by the database trigger.
///
/// Wire: `{ "entityName": "Projects", "operation": "UPDATE", "entityId": "42", "changedAt": "..." }`
///
/// `entity_id` is always text so tables with different key column names and
/// types share one payload shape. Consumers parse it into their own key type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    pub entity_name: EntityName,
    pub operation: Operation,
    pub entity_id: String,
    pub changed_at: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn new(entity_name: EntityName, operation: Operation, entity_id: impl Into<String>) -> Self {
        Self {
            entity_name,
            operation,
            entity_id: entity_id.into(),
            changed_at: Utc::now(),
        }
    }
}

/// Per-connection identifier (random UUID, not persisted).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnId(pub String);

impl ConnId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ConnId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_event_matches_trigger_payload() {
        let json = r#"{"entityName":"Projects","operation":"UPDATE","entityId":"42","changedAt":"2025-05-13T10:15:30Z"}"#;
        let ev: ChangeEvent = serde_json::from_str(json).unwrap();
        assert_eq!(ev.entity_name, EntityName::Projects);
        assert_eq!(ev.operation, Operation::Update);
        assert_eq!(ev.entity_id, "42");
        assert_eq!(ev.changed_at.to_rfc3339(), "2025-05-13T10:15:30+00:00");
    }

    #[test]
    fn change_event_accepts_fractional_seconds() {
        let json = r#"{"entityName":"Notes","operation":"DELETE","entityId":"7","changedAt":"2025-05-13T10:15:30.123456Z"}"#;
        let ev: ChangeEvent = serde_json::from_str(json).unwrap();
        assert_eq!(ev.operation, Operation::Delete);
    }

    #[test]
    fn unknown_entity_is_rejected() {
        let json = r#"{"entityName":"Invoices","operation":"INSERT","entityId":"1","changedAt":"2025-05-13T10:15:30Z"}"#;
        assert!(serde_json::from_str::<ChangeEvent>(json).is_err());
        assert!("Invoices".parse::<EntityName>().is_err());
    }

    #[test]
    fn lowercase_operation_is_rejected() {
        let json = r#"{"entityName":"Notes","operation":"insert","entityId":"1","changedAt":"2025-05-13T10:15:30Z"}"#;
        assert!(serde_json::from_str::<ChangeEvent>(json).is_err());
    }

    #[test]
    fn entity_name_string_forms_agree() {
        for entity in EntityName::ALL {
            let parsed: EntityName = entity.as_str().parse().unwrap();
            assert_eq!(parsed, entity);
            let json = serde_json::to_string(&entity).unwrap();
            assert_eq!(json, format!("\"{}\"", entity));
        }
    }
}
