//! Upserts and deletes

use super::NodeStore;
use crate::error::{NodeError, NodeResult};
use crate::query::{quote_identifier, Filter, ResolvedCollection};
use crate::schema::SchemaError;
use crate::{log_mutation_debug, log_mutation_warn, Record};
use serde_json::Value;
use std::collections::HashSet;

/// Outcome of [`NodeStore::set`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertResult {
    /// A new row was written; `id` is the generated key, if any
    Inserted { id: Option<u64> },
    /// An existing row matched a key
    Updated,
}

impl UpsertResult {
    pub fn inserted_id(&self) -> Option<u64> {
        match self {
            UpsertResult::Inserted { id } => *id,
            UpsertResult::Updated => None,
        }
    }
}

/// What [`NodeStore::delete`] removes
#[derive(Debug, Clone)]
pub enum DeleteTarget {
    /// Every record of a collection
    Collection(String),
    /// Every record matching a filter
    Filter(Filter),
}

impl From<&str> for DeleteTarget {
    fn from(collection: &str) -> Self {
        DeleteTarget::Collection(collection.to_string())
    }
}

impl From<String> for DeleteTarget {
    fn from(collection: String) -> Self {
        DeleteTarget::Collection(collection)
    }
}

impl From<Filter> for DeleteTarget {
    fn from(filter: Filter) -> Self {
        DeleteTarget::Filter(filter)
    }
}

impl NodeStore {
    /// Insert `record`, or update the row it collides with on a key.
    ///
    /// With `extend_exists`, fields of the existing row that `record` lacks
    /// are kept instead of being cleared. More than one existing row matching
    /// the record's keys is an [`NodeError::AmbiguousUpdate`].
    pub fn set(&self, mut record: Record, extend_exists: bool) -> NodeResult<UpsertResult> {
        let discriminator = &self.config().discriminator_field;
        let collection = record
            .get(discriminator)
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                NodeError::invalid_record(format!("record has no '{}' field", discriminator))
            })?;
        let target = self.compiler().resolve(&collection)?;

        if extend_exists {
            self.extend_from_existing(&target, &mut record)?;
        }

        let encoded = self.codec().encode(&record, &target.columns)?;
        if encoded.columns.is_empty() {
            return Err(NodeError::invalid_record(format!(
                "record for {} has no storable fields",
                collection
            )));
        }

        let key_names: HashSet<&str> = target.key_columns().iter().map(|c| c.name.as_str()).collect();
        let names: Vec<String> = encoded.columns.iter().map(|(c, _)| quote_identifier(c)).collect();
        let mut updates: Vec<String> = encoded
            .columns
            .iter()
            .filter(|(c, _)| !key_names.contains(c.as_str()))
            .map(|(c, _)| {
                let column = quote_identifier(c);
                format!("{} = VALUES({})", column, column)
            })
            .collect();
        if updates.is_empty() {
            let anchor = target
                .key_columns()
                .first()
                .map(|c| quote_identifier(&c.name))
                .unwrap_or_else(|| names[0].clone());
            updates.push(format!("{} = {}", anchor, anchor));
        }

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({}) ON DUPLICATE KEY UPDATE {}",
            quote_identifier(&target.table),
            names.join(", "),
            vec!["?"; names.len()].join(", "),
            updates.join(", ")
        );
        let params: Vec<Value> = encoded.columns.into_iter().map(|(_, v)| v).collect();
        let result = self.connections().exec(self.profile(), &sql, &params)?;

        let outcome = if result.affected_rows == 1 {
            UpsertResult::Inserted {
                id: result.last_insert_id,
            }
        } else {
            UpsertResult::Updated
        };
        log_mutation_debug!("Upserted {} record: {:?}", collection, outcome);
        Ok(outcome)
    }

    /// Delete a whole collection or the records matching a filter. Returns
    /// the number of rows removed.
    pub fn delete(&self, target: impl Into<DeleteTarget>) -> NodeResult<u64> {
        match target.into() {
            DeleteTarget::Collection(collection) => self.delete_collection(&collection),
            DeleteTarget::Filter(filter) => self.delete_matching(filter),
        }
    }

    /// Delete one decoded record by its identity columns
    pub(crate) fn delete_record(&self, collection: &str, record: &Record) -> NodeResult<u64> {
        let target = self.compiler().resolve(collection)?;
        if target.identity_columns().is_empty() {
            return Err(SchemaError::NoKeyColumns(target.table).into());
        }
        self.delete_by_identity(&target, record)
    }

    fn delete_collection(&self, collection: &str) -> NodeResult<u64> {
        let target = self.compiler().resolve(collection)?;
        let table = quote_identifier(&target.table);
        let (sql, params) = if target.base_fallback {
            (
                format!(
                    "DELETE FROM {} WHERE {} = ?",
                    table,
                    quote_identifier(&self.config().discriminator_field)
                ),
                vec![Value::String(collection.to_string())],
            )
        } else {
            (format!("DELETE FROM {}", table), Vec::new())
        };

        let result = self.connections().exec(self.profile(), &sql, &params)?;
        log_mutation_debug!("Deleted {} rows of {}", result.affected_rows, collection);
        Ok(result.affected_rows)
    }

    /// Matching records are read in full before the first delete runs
    fn delete_matching(&self, mut filter: Filter) -> NodeResult<u64> {
        let collection = filter
            .collection
            .clone()
            .ok_or_else(|| NodeError::invalid_filter("filter has no @collection"))?;
        let target = self.compiler().resolve(&collection)?;
        if target.identity_columns().is_empty() {
            return Err(SchemaError::NoKeyColumns(target.table).into());
        }

        filter.select.clear();
        let records = self.get(filter)?.to_vec()?;

        let mut affected = 0;
        for record in &records {
            affected += self.delete_by_identity(&target, record)?;
        }
        log_mutation_debug!("Deleted {} matching rows of {}", affected, collection);
        Ok(affected)
    }

    fn delete_by_identity(&self, target: &ResolvedCollection, record: &Record) -> NodeResult<u64> {
        let identity = target.identity_columns();
        let present = |name: &str| record.get(name).filter(|v| !v.is_null()).cloned();

        // every primary column is required; any one unique column suffices
        let keys: Vec<(String, Value)> = if identity.first().map_or(false, |c| c.is_primary()) {
            identity
                .iter()
                .map(|c| present(&c.name).map(|v| (c.name.clone(), v)))
                .collect::<Option<Vec<_>>>()
                .unwrap_or_default()
        } else {
            identity
                .iter()
                .find_map(|c| present(&c.name).map(|v| vec![(c.name.clone(), v)]))
                .unwrap_or_default()
        };

        if keys.is_empty() {
            log_mutation_warn!(
                "Skipping delete of a {} record without key values",
                target.collection
            );
            return Ok(0);
        }

        let mut conditions: Vec<String> = keys
            .iter()
            .map(|(name, _)| format!("{} = ?", quote_identifier(name)))
            .collect();
        let mut params: Vec<Value> = keys.into_iter().map(|(_, v)| v).collect();
        self.scope_to_collection(target, &mut conditions, &mut params);

        let sql = format!(
            "DELETE FROM {} WHERE {}",
            quote_identifier(&target.table),
            conditions.join(" AND ")
        );
        Ok(self.connections().exec(self.profile(), &sql, &params)?.affected_rows)
    }

    /// Merge fields of the row `record` collides with into `record`.
    ///
    /// The primary key (when fully present) and each present unique column
    /// identify a row on their own, so they are OR'ed.
    fn extend_from_existing(&self, target: &ResolvedCollection, record: &mut Record) -> NodeResult<()> {
        let present = |name: &str| record.get(name).filter(|v| !v.is_null()).cloned();

        let mut groups = Vec::new();
        let mut params = Vec::new();
        let mut used_keys = Vec::new();

        let primary: Vec<_> = target.columns.iter().filter(|c| c.is_primary()).collect();
        let primary_values: Option<Vec<Value>> = primary.iter().map(|c| present(&c.name)).collect();
        if let (false, Some(values)) = (primary.is_empty(), primary_values) {
            let condition = primary
                .iter()
                .map(|c| format!("{} = ?", quote_identifier(&c.name)))
                .collect::<Vec<_>>()
                .join(" AND ");
            groups.push(format!("({})", condition));
            params.extend(values);
            used_keys.extend(primary.iter().map(|c| c.name.clone()));
        }
        for column in target.columns.iter().filter(|c| c.is_unique() && !c.is_primary()) {
            if let Some(value) = present(&column.name) {
                groups.push(format!("{} = ?", quote_identifier(&column.name)));
                params.push(value);
                used_keys.push(column.name.clone());
            }
        }

        if groups.is_empty() {
            return Ok(());
        }

        let mut conditions = vec![format!("({})", groups.join(" OR "))];
        self.scope_to_collection(target, &mut conditions, &mut params);
        let sql = format!(
            "SELECT * FROM {} WHERE {}",
            quote_identifier(&target.table),
            conditions.join(" AND ")
        );
        let rows = self.connections().query(self.profile(), &sql, &params)?;

        if rows.len() > 1 {
            return Err(NodeError::AmbiguousUpdate {
                table: target.table.clone(),
                keys: used_keys,
                matches: rows.len(),
            });
        }

        if let Some(row) = rows.into_iter().next() {
            let existing = self.codec().decode(row, &target.collection)?;
            let key_names: HashSet<&str> = target.key_columns().iter().map(|c| c.name.as_str()).collect();
            for (field, value) in existing {
                if !key_names.contains(field.as_str()) && !record.contains_key(&field) {
                    record.insert(field, value);
                }
            }
            log_mutation_debug!("Extended {} record from its existing row", target.collection);
        }
        Ok(())
    }

    fn scope_to_collection(
        &self,
        target: &ResolvedCollection,
        conditions: &mut Vec<String>,
        params: &mut Vec<Value>,
    ) {
        if target.base_fallback {
            conditions.push(format!(
                "{} = ?",
                quote_identifier(&self.config().discriminator_field)
            ));
            params.push(Value::String(target.collection.clone()));
        }
    }
}
