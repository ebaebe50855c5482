//! Lazy, rewindable iteration over query results

use super::NodeStore;
use crate::db_operations::provider::{StatementHandle, StatementOptions};
use crate::error::{NodeError, NodeResult};
use crate::query::matcher::compare_records;
use crate::query::{QueryPlan, RecordMatcher};
use crate::Record;
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};

/// Cursor over the records matching a filter.
///
/// Rows are fetched one at a time as the cursor advances. Fields without a
/// physical column are filtered in process, so logical positions can differ
/// from the row positions of the underlying statement; the cursor keeps a
/// sparse map between the two.
///
/// The cursor executes a cached statement. Opening a second cursor with the
/// same SQL on the same profile restarts the statement under the first one.
pub struct EntityCursor<'s> {
    store: &'s NodeStore,
    plan: QueryPlan,
    matcher: RecordMatcher,
    statement: Option<StatementHandle>,
    /// Logical position; None before the first advance
    position: Option<usize>,
    /// Logical position to absolute row index of the current execution
    index_map: BTreeMap<usize, usize>,
    current: Option<Record>,
    /// Unprojected form of `current` when a projection applies
    current_source: Option<Record>,
    exhausted: bool,
    rows_read: usize,
    matched: u64,
    buffer: Option<VecDeque<(usize, Record)>>,
    total: Option<usize>,
    pending_error: Option<NodeError>,
}

impl<'s> EntityCursor<'s> {
    /// Execute the plan and position the cursor on the first record
    pub(crate) fn open(store: &'s NodeStore, plan: QueryPlan) -> NodeResult<Self> {
        let matcher = RecordMatcher::new(&plan.leftover)?;
        let mut cursor = Self {
            store,
            plan,
            matcher,
            statement: None,
            position: None,
            index_map: BTreeMap::new(),
            current: None,
            current_source: None,
            exhausted: false,
            rows_read: 0,
            matched: 0,
            buffer: None,
            total: None,
            pending_error: None,
        };
        cursor.execute()?;
        cursor.advance()?;
        Ok(cursor)
    }

    pub fn plan(&self) -> &QueryPlan {
        &self.plan
    }

    /// The record at the current position
    pub fn current(&self) -> Option<&Record> {
        self.current.as_ref()
    }

    /// The current logical position, if positioned on a record
    pub fn key(&self) -> Option<usize> {
        self.current.as_ref().and(self.position)
    }

    /// True before the first advance and while positioned on a record
    pub fn valid(&self) -> bool {
        self.position.is_none() || self.current.is_some()
    }

    /// Absolute row index behind a logical position of this execution
    pub fn row_index(&self, position: usize) -> Option<usize> {
        self.index_map.get(&position).copied()
    }

    /// Move to the next matching record
    pub fn advance(&mut self) -> NodeResult<()> {
        if self.exhausted {
            self.clear_current();
            return Ok(());
        }

        let next = self.position.map_or(0, |p| p + 1);
        match self.pull()? {
            Some((row, record)) => {
                self.position = Some(next);
                self.index_map.insert(next, row);
                self.set_current(record);
            }
            None => {
                self.position = Some(next);
                self.exhausted = true;
                self.clear_current();
            }
        }
        Ok(())
    }

    /// Re-execute the statement and move to the first record. A no-op when
    /// already positioned on the first record.
    pub fn rewind(&mut self) -> NodeResult<()> {
        if self.position == Some(0) && self.current.is_some() {
            return Ok(());
        }
        self.execute()?;
        self.advance()
    }

    /// Number of records the cursor yields in total, independent of the
    /// current position. Named apart from `Iterator::count`, which consumes
    /// the cursor and counts only what is left.
    ///
    /// Without in-process conditions this is a `COUNT(*)` query. Otherwise
    /// the cursor is drained from the start and moved back to its position,
    /// which costs a full re-execution. The result holds until the query is
    /// executed again.
    pub fn total(&mut self) -> NodeResult<usize> {
        if let Some(total) = self.total {
            return Ok(total);
        }

        let total = if self.plan.is_countable_in_sql() {
            count_in_sql(self.store, &self.plan)?
        } else {
            let resume = self.key();
            self.execute()?;
            self.advance()?;
            while self.current.is_some() {
                self.advance()?;
            }
            let total = self.index_map.len();
            if let Some(position) = resume {
                self.seek(position)?;
            }
            total
        };

        self.total = Some(total);
        Ok(total)
    }

    /// Move to a logical position, rewinding when it lies behind
    pub fn seek(&mut self, position: usize) -> NodeResult<bool> {
        if self.position.map_or(true, |p| position < p) {
            self.rewind()?;
        }
        while self.current.is_some() && self.position.map_or(true, |p| p < position) {
            self.advance()?;
        }
        Ok(self.current.is_some() && self.position == Some(position))
    }

    /// Record at a logical position
    pub fn at(&mut self, position: usize) -> NodeResult<Option<Record>> {
        Ok(if self.seek(position)? {
            self.current.clone()
        } else {
            None
        })
    }

    pub fn exists(&mut self, position: usize) -> NodeResult<bool> {
        self.seek(position)
    }

    /// Delete the record at a logical position by its key columns
    pub fn remove(&mut self, position: usize) -> NodeResult<u64> {
        if !self.seek(position)? {
            return Ok(0);
        }
        let record = match self.current_source.as_ref().or(self.current.as_ref()) {
            Some(record) => record.clone(),
            None => return Ok(0),
        };

        let affected = self.store.delete_record(&self.plan.collection, &record)?;
        self.index_map.clear();
        self.total = None;
        Ok(affected)
    }

    /// Every record from the start
    pub fn to_vec(&mut self) -> NodeResult<Vec<Record>> {
        self.rewind()?;
        let mut records = Vec::new();
        while let Some(record) = self.current.take() {
            records.push(record);
            self.advance()?;
        }
        Ok(records)
    }

    fn execute(&mut self) -> NodeResult<()> {
        let store = self.store;
        let connections = store.connections();
        let profile = store.profile();
        let statement = connections.prepare(profile, &self.plan.sql, &StatementOptions::default())?;
        connections.execute(profile, statement, &self.plan.params)?;

        self.statement = Some(statement);
        self.position = None;
        self.index_map.clear();
        self.clear_current();
        self.exhausted = false;
        self.rows_read = 0;
        self.matched = 0;
        self.buffer = None;
        self.total = None;

        if self.plan.buffered {
            let buffer = self.materialize()?;
            self.buffer = Some(buffer);
        }
        Ok(())
    }

    fn fetch_decoded(&mut self) -> NodeResult<Option<(usize, Record)>> {
        let Some(statement) = self.statement else {
            return Ok(None);
        };
        match self.store.connections().fetch(self.store.profile(), statement)? {
            Some(row) => {
                let index = self.rows_read;
                self.rows_read += 1;
                let record = self.store.codec().decode(row, &self.plan.collection)?;
                Ok(Some((index, record)))
            }
            None => Ok(None),
        }
    }

    /// Drain, filter and sort the whole result, then apply the window
    fn materialize(&mut self) -> NodeResult<VecDeque<(usize, Record)>> {
        let mut rows = Vec::new();
        while let Some((index, record)) = self.fetch_decoded()? {
            if self.matcher.matches(&record) {
                rows.push((index, record));
            }
        }
        rows.sort_by(|a, b| compare_records(&self.plan.sorters, &a.1, &b.1));

        let offset = usize::try_from(self.plan.limit.offset).unwrap_or(usize::MAX);
        let length = self
            .plan
            .limit
            .length
            .map_or(usize::MAX, |l| usize::try_from(l).unwrap_or(usize::MAX));
        Ok(rows.into_iter().skip(offset).take(length).collect())
    }

    /// Next record that passes the in-process conditions and window
    fn pull(&mut self) -> NodeResult<Option<(usize, Record)>> {
        if let Some(buffer) = self.buffer.as_mut() {
            return Ok(buffer.pop_front());
        }

        loop {
            if !self.plan.sql_limited && self.plan.limit.is_past_end(self.matched) {
                return Ok(None);
            }
            let Some((index, record)) = self.fetch_decoded()? else {
                return Ok(None);
            };
            if !self.matcher.matches(&record) {
                continue;
            }
            self.matched += 1;
            if !self.plan.sql_limited && self.matched <= self.plan.limit.offset {
                continue;
            }
            return Ok(Some((index, record)));
        }
    }

    fn set_current(&mut self, record: Record) {
        match &self.plan.projection {
            Some(fields) => {
                let projected = fields
                    .iter()
                    .filter_map(|f| record.get(f).map(|v| (f.clone(), v.clone())))
                    .collect();
                self.current = Some(projected);
                self.current_source = Some(record);
            }
            None => {
                self.current = Some(record);
                self.current_source = None;
            }
        }
    }

    fn clear_current(&mut self) {
        self.current = None;
        self.current_source = None;
    }
}

impl Iterator for EntityCursor<'_> {
    type Item = NodeResult<Record>;

    /// Yields from the current position onward; call `rewind` to restart
    fn next(&mut self) -> Option<Self::Item> {
        if let Some(error) = self.pending_error.take() {
            return Some(Err(error));
        }
        let record = self.current.take()?;
        if let Err(error) = self.advance() {
            self.pending_error = Some(error);
        }
        Some(Ok(record))
    }
}

/// `COUNT(*)` over the plan's WHERE clause, clamped to its window
pub(crate) fn count_in_sql(store: &NodeStore, plan: &QueryPlan) -> NodeResult<usize> {
    let rows = store
        .connections()
        .query(store.profile(), &plan.count_sql, &plan.count_params)?;
    let total = rows
        .first()
        .and_then(|row| row.values().next())
        .and_then(|value| match value {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        })
        .unwrap_or(0);
    Ok(usize::try_from(plan.limit.clamp(total)).unwrap_or(usize::MAX))
}
