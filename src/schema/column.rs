use crate::db_operations::provider::Row;
use crate::schema::SchemaError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

/// Key participation of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum KeyRole {
    Primary,
    Unique,
}

impl KeyRole {
    /// Maps the `Key` attribute of `SHOW COLUMNS`
    pub fn from_key_attribute(key: &str) -> Option<Self> {
        match key {
            "PRI" => Some(KeyRole::Primary),
            "UNI" => Some(KeyRole::Unique),
            _ => None,
        }
    }
}

/// Metadata of one physical column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub sql_type: Option<String>,
    pub nullable: bool,
    pub key_roles: BTreeSet<KeyRole>,
    /// Extra attributes such as `auto_increment`
    pub has_extra: bool,
}

impl Column {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: None,
            nullable: true,
            key_roles: BTreeSet::new(),
            has_extra: false,
        }
    }

    pub fn with_role(mut self, role: KeyRole) -> Self {
        self.key_roles.insert(role);
        self
    }

    pub fn is_primary(&self) -> bool {
        self.key_roles.contains(&KeyRole::Primary)
    }

    pub fn is_unique(&self) -> bool {
        self.key_roles.contains(&KeyRole::Unique)
    }

    pub fn is_key(&self) -> bool {
        !self.key_roles.is_empty()
    }

    /// Build from a `SHOW COLUMNS` row
    pub fn from_row(table: &str, row: &Row) -> Result<Self, SchemaError> {
        let attribute = |name: &str| row.get(name).and_then(Value::as_str).unwrap_or("");

        let name = attribute("Field");
        if name.is_empty() {
            return Err(SchemaError::MalformedColumn {
                table: table.to_string(),
                message: "column row without a Field attribute".to_string(),
            });
        }

        let sql_type = Some(attribute("Type").to_string()).filter(|t| !t.is_empty());
        let mut column = Column {
            name: name.to_string(),
            sql_type,
            nullable: attribute("Null").eq_ignore_ascii_case("YES"),
            key_roles: BTreeSet::new(),
            has_extra: !attribute("Extra").is_empty(),
        };
        if let Some(role) = KeyRole::from_key_attribute(attribute("Key")) {
            column.key_roles.insert(role);
        }
        Ok(column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_show_columns_rows() {
        let row = json!({
            "Field": "id", "Type": "int(11)", "Null": "NO",
            "Key": "PRI", "Default": null, "Extra": "auto_increment"
        });
        let column = Column::from_row("Widgets", row.as_object().unwrap()).unwrap();
        assert_eq!(column.name, "id");
        assert!(column.is_primary());
        assert!(!column.nullable);
        assert!(column.has_extra);

        let row = json!({ "Field": "note", "Type": "text", "Null": "YES", "Key": "MUL", "Extra": "" });
        let column = Column::from_row("Widgets", row.as_object().unwrap()).unwrap();
        assert!(!column.is_key());
        assert!(column.nullable);
    }

    #[test]
    fn rejects_rows_without_a_name() {
        let row = json!({ "Type": "int" });
        assert!(matches!(
            Column::from_row("Widgets", row.as_object().unwrap()),
            Err(SchemaError::MalformedColumn { .. })
        ));
    }
}
