//! Filter to SQL composition
//!
//! Conditions on physical columns become parameterised SQL. Conditions on
//! fields that only live in the virtual column are returned as a leftover
//! filter for in-process evaluation.

use super::expression::ExpressionParser;
use super::filter::{Filter, Limit, SortDirective};
use super::quote_identifier;
use crate::config::EngineConfig;
use crate::error::{NodeError, NodeResult};
use crate::log_query_debug;
use crate::schema::{Column, SchemaCache, SchemaError};
use serde_json::Value;
use std::sync::Arc;

/// The table a collection is stored in
#[derive(Debug, Clone)]
pub struct ResolvedCollection {
    pub collection: String,
    pub table: String,
    /// Stored in the shared base table, scoped by the discriminator column
    pub base_fallback: bool,
    pub columns: Vec<Column>,
}

impl ResolvedCollection {
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    /// Primary key columns, or unique columns when there is no primary key
    pub fn identity_columns(&self) -> Vec<&Column> {
        let primary: Vec<&Column> = self.columns.iter().filter(|c| c.is_primary()).collect();
        if primary.is_empty() {
            self.columns.iter().filter(|c| c.is_unique()).collect()
        } else {
            primary
        }
    }

    pub fn key_columns(&self) -> Vec<&Column> {
        self.columns.iter().filter(|c| c.is_key()).collect()
    }
}

/// A composed query ready for execution
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub collection: String,
    pub table: String,
    pub base_fallback: bool,
    pub sql: String,
    pub params: Vec<Value>,
    pub count_sql: String,
    pub count_params: Vec<Value>,
    pub pushed_fields: Vec<String>,
    /// Conditions evaluated in process after decoding
    pub leftover: Filter,
    pub limit: Limit,
    /// Whether `limit` is already applied by the SQL statement
    pub sql_limited: bool,
    /// Fields requested by `@select`, in request order
    pub projection: Option<Vec<String>>,
    /// Sort chain applied in memory when `buffered`
    pub sorters: Vec<SortDirective>,
    /// A custom comparator forces the whole result to be sorted in memory
    pub buffered: bool,
}

impl QueryPlan {
    /// Whether `COUNT(*)` over the same WHERE clause gives the exact count
    pub fn is_countable_in_sql(&self) -> bool {
        self.leftover.fields.is_empty() && !self.buffered
    }
}

/// Composes [`QueryPlan`]s from filters using cached table metadata
pub struct QueryCompiler {
    schema: Arc<SchemaCache>,
    base_collection: String,
    discriminator: String,
    virtual_column: String,
}

impl QueryCompiler {
    pub fn new(schema: Arc<SchemaCache>, config: &EngineConfig) -> Self {
        Self {
            schema,
            base_collection: config.base_collection.clone(),
            discriminator: config.discriminator_field.clone(),
            virtual_column: config.virtual_column.clone(),
        }
    }

    pub fn schema(&self) -> &Arc<SchemaCache> {
        &self.schema
    }

    /// Find the dedicated table of a collection, falling back to the base table
    pub fn resolve(&self, collection: &str) -> NodeResult<ResolvedCollection> {
        if self.schema.has_table(collection)? {
            return Ok(ResolvedCollection {
                collection: collection.to_string(),
                table: collection.to_string(),
                base_fallback: false,
                columns: self.schema.get_columns(collection, None)?,
            });
        }

        if self.schema.has_table(&self.base_collection)? {
            let columns = self.schema.get_columns(&self.base_collection, None)?;
            if columns.iter().any(|c| c.name == self.discriminator) {
                return Ok(ResolvedCollection {
                    collection: collection.to_string(),
                    table: self.base_collection.clone(),
                    base_fallback: true,
                    columns,
                });
            }
        }

        Err(SchemaError::TableNotFound(collection.to_string()).into())
    }

    pub fn compose(&self, filter: &Filter) -> NodeResult<QueryPlan> {
        let collection = filter
            .collection
            .as_deref()
            .ok_or_else(|| NodeError::invalid_filter("filter has no @collection"))?;
        let target = self.resolve(collection)?;

        let mut conditions = Vec::new();
        let mut params = Vec::new();

        if target.base_fallback {
            conditions.push(format!("{} = ?", quote_identifier(&self.discriminator)));
            params.push(Value::String(collection.to_string()));
        }

        for fragment in &filter.raw {
            conditions.push(format!("({})", fragment.sql));
            params.extend(fragment.params.iter().cloned());
        }

        let mut leftover = Filter::for_collection(collection);
        let mut pushed_fields = Vec::new();
        for (field, value) in &filter.fields {
            let expressions = ExpressionParser::parse_set(field, value)?;
            if target.has_column(field) {
                let terms = ExpressionParser::group(expressions);
                conditions.push(ExpressionParser::compile_field(
                    &quote_identifier(field),
                    &terms,
                    &mut params,
                ));
                pushed_fields.push(field.clone());
            } else {
                leftover.fields.insert(field.clone(), value.clone());
            }
        }

        let buffered = filter.has_custom_sort();
        let limit = filter.limit.unwrap_or_default();
        let sql_limited = leftover.fields.is_empty() && !buffered;

        let from = self.from_clause(&target, &filter.index_hints);
        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };

        let order_clause = if buffered {
            String::new()
        } else {
            self.order_clause(&target, &filter.sort)
        };
        let limit_clause = match filter.limit {
            Some(limit) if sql_limited => format!(" {}", limit.to_sql()),
            _ => String::new(),
        };

        // projected records still say which collection they belong to
        let projection = if filter.select.is_empty() {
            None
        } else {
            let mut fields = vec![self.discriminator.clone()];
            fields.extend(
                filter
                    .select
                    .iter()
                    .filter(|field| **field != self.discriminator)
                    .cloned(),
            );
            Some(fields)
        };
        let select_list = self.select_list(&target, filter, &leftover, buffered);

        let sql = format!(
            "SELECT {} {}{}{}{}",
            select_list, from, where_clause, order_clause, limit_clause
        );
        let count_sql = format!("SELECT COUNT(*) {}{}", from, where_clause);
        log_query_debug!("Composed query for {}: {}", collection, sql);

        Ok(QueryPlan {
            collection: collection.to_string(),
            table: target.table,
            base_fallback: target.base_fallback,
            sql,
            count_params: params.clone(),
            params,
            count_sql,
            pushed_fields,
            leftover,
            limit,
            sql_limited,
            projection,
            sorters: if buffered { filter.sort.clone() } else { Vec::new() },
            buffered,
        })
    }

    fn from_clause(&self, target: &ResolvedCollection, hints: &[String]) -> String {
        let mut from = format!("FROM {}", quote_identifier(&target.table));
        if !hints.is_empty() {
            let indexes: Vec<String> = hints.iter().map(|h| quote_identifier(h)).collect();
            from.push_str(&format!(" USE INDEX ({})", indexes.join(", ")));
        }
        from
    }

    /// Physical field directives become ORDER BY; other fields are dropped
    fn order_clause(&self, target: &ResolvedCollection, sort: &[SortDirective]) -> String {
        let mut terms = Vec::new();
        for directive in sort {
            if let SortDirective::Field { field, ascending } = directive {
                if target.has_column(field) {
                    let dir = if *ascending { "ASC" } else { "DESC" };
                    terms.push(format!("{} {}", quote_identifier(field), dir));
                } else {
                    log_query_debug!("Dropping sort on non-physical field '{}'", field);
                }
            }
        }
        if terms.is_empty() {
            String::new()
        } else {
            format!(" ORDER BY {}", terms.join(", "))
        }
    }

    /// Columns fetched for a projected query. Identity keys are always
    /// fetched; the virtual column is added whenever a requested, filtered or
    /// sorted field lives inside it.
    fn select_list(
        &self,
        target: &ResolvedCollection,
        filter: &Filter,
        leftover: &Filter,
        buffered: bool,
    ) -> String {
        if filter.select.is_empty() {
            return "*".to_string();
        }

        let mut columns: Vec<&str> = Vec::new();
        let mut needs_virtual = !leftover.fields.is_empty();

        let sort_fields = filter.sort.iter().filter_map(|d| match d {
            SortDirective::Field { field, .. } if buffered => Some(field.as_str()),
            _ => None,
        });
        for field in filter.select.iter().map(String::as_str).chain(sort_fields) {
            if target.has_column(field) {
                if !columns.contains(&field) {
                    columns.push(field);
                }
            } else {
                needs_virtual = true;
            }
        }

        if buffered && filter.sort.iter().any(SortDirective::is_custom) {
            // comparators may read any field
            return "*".to_string();
        }
        for key in target.identity_columns() {
            if !columns.contains(&key.name.as_str()) {
                columns.push(&key.name);
            }
        }
        if target.base_fallback && !columns.contains(&self.discriminator.as_str()) {
            columns.push(&self.discriminator);
        }
        if needs_virtual
            && target.has_column(&self.virtual_column)
            && !columns.contains(&self.virtual_column.as_str())
        {
            columns.push(&self.virtual_column);
        }

        if columns.is_empty() {
            "*".to_string()
        } else {
            columns
                .iter()
                .map(|c| quote_identifier(c))
                .collect::<Vec<_>>()
                .join(", ")
        }
    }
}
