//! Lowers `sqlparser` statements into the subset the in-memory engine runs.
//!
//! Statements are parsed with the MySQL dialect and walked once; the result
//! carries plain column names and numbered placeholders so execution never
//! touches the AST again.

use crate::db_operations::provider::DriverError;
use crate::query::Operator;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use sqlparser::ast::{
    Assignment, BinaryOperator, Expr as SqlExpr, FunctionArg, FunctionArgExpr, Ident, ObjectName,
    OnInsert, Query, SelectItem, SetExpr, Statement as SqlStatement, TableFactor, TableWithJoins,
    UnaryOperator, Value as SqlValue,
};
use sqlparser::dialect::MySqlDialect;
use sqlparser::parser::Parser;

const SYNTAX_ERROR: &str = "42000";

/// Index hints only steer the server's planner; the parser does not model them
static INDEX_HINT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\s+(?:USE|FORCE|IGNORE)\s+INDEX\s*\([^)]*\)").expect("valid index hint pattern")
});

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Operand {
    Column(String),
    Param(usize),
    Literal(Value),
    /// `VALUES(col)` inside `ON DUPLICATE KEY UPDATE`
    Inserted(String),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Compare(Operand, Operator, Operand),
    InList {
        operand: Operand,
        list: Vec<Operand>,
        negated: bool,
    },
    IsNull {
        operand: Operand,
        negated: bool,
    },
    Like {
        operand: Operand,
        pattern: Operand,
        negated: bool,
    },
    Regexp {
        operand: Operand,
        pattern: Operand,
        negated: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Projection {
    All,
    Columns(Vec<String>),
    Count,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Statement {
    ShowTables,
    ShowColumns {
        table: String,
    },
    Select {
        table: String,
        projection: Projection,
        filter: Option<Expr>,
        order: Vec<(String, bool)>,
        limit: Option<(u64, u64)>,
    },
    Insert {
        table: String,
        columns: Vec<String>,
        values: Vec<Operand>,
        on_duplicate: Vec<(String, Operand)>,
    },
    Delete {
        table: String,
        filter: Option<Expr>,
    },
    LockTables {
        tables: Vec<String>,
    },
    UnlockTables,
}

/// A lowered statement and the number of `?` placeholders it binds
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ParsedStatement {
    pub statement: Statement,
    pub placeholders: usize,
}

pub(crate) fn parse(sql: &str) -> Result<ParsedStatement, DriverError> {
    let text = INDEX_HINT.replace_all(sql, "");
    let mut statements =
        Parser::parse_sql(&MySqlDialect {}, &text).map_err(|e| syntax(e.to_string()))?;
    if statements.len() != 1 {
        return Err(syntax(format!(
            "expected exactly one statement, found {} in '{}'",
            statements.len(),
            sql
        )));
    }

    let mut lowering = Lowering { placeholders: 0 };
    let statement = lowering.statement(statements.remove(0))?;
    Ok(ParsedStatement {
        statement,
        placeholders: lowering.placeholders,
    })
}

fn syntax(message: String) -> DriverError {
    DriverError::statement(SYNTAX_ERROR, message)
}

fn unsupported(what: &str, detail: impl std::fmt::Debug) -> DriverError {
    syntax(format!("unsupported {}: {:?}", what, detail))
}

fn object_name(name: &ObjectName) -> Result<String, DriverError> {
    name.0
        .last()
        .map(|ident| ident.value.clone())
        .ok_or_else(|| syntax("empty object name".to_string()))
}

fn single_table(from: &[TableWithJoins]) -> Result<String, DriverError> {
    match from {
        [table] if table.joins.is_empty() => match &table.relation {
            TableFactor::Table { name, .. } => object_name(name),
            other => Err(unsupported("table factor", other)),
        },
        other => Err(unsupported("FROM clause", other)),
    }
}

fn column_name(expr: &SqlExpr) -> Result<String, DriverError> {
    match expr {
        SqlExpr::Identifier(ident) => Ok(ident.value.clone()),
        SqlExpr::CompoundIdentifier(parts) => parts
            .last()
            .map(|ident| ident.value.clone())
            .ok_or_else(|| syntax("empty column name".to_string())),
        other => Err(unsupported("column reference", other)),
    }
}

fn number(text: &str) -> Result<Value, DriverError> {
    if let Ok(n) = text.parse::<i64>() {
        return Ok(Value::from(n));
    }
    if let Ok(n) = text.parse::<u64>() {
        return Ok(Value::from(n));
    }
    text.parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| syntax(format!("invalid number '{}'", text)))
}

fn literal(value: SqlValue) -> Result<Value, DriverError> {
    match value {
        SqlValue::Number(text, _) => number(&text),
        SqlValue::SingleQuotedString(text) | SqlValue::DoubleQuotedString(text) => {
            Ok(Value::String(text))
        }
        SqlValue::Boolean(b) => Ok(Value::Bool(b)),
        SqlValue::Null => Ok(Value::Null),
        other => Err(unsupported("literal", other)),
    }
}

fn unsigned(expr: &SqlExpr) -> Result<u64, DriverError> {
    match expr {
        SqlExpr::Value(SqlValue::Number(text, _)) => text
            .parse()
            .map_err(|_| syntax(format!("expected unsigned integer, found {}", text))),
        other => Err(unsupported("LIMIT operand", other)),
    }
}

fn comparison(op: &BinaryOperator) -> Option<Operator> {
    match op {
        BinaryOperator::Eq => Some(Operator::Eq),
        BinaryOperator::NotEq => Some(Operator::Ne),
        BinaryOperator::Lt => Some(Operator::Lt),
        BinaryOperator::LtEq => Some(Operator::Le),
        BinaryOperator::Gt => Some(Operator::Gt),
        BinaryOperator::GtEq => Some(Operator::Ge),
        _ => None,
    }
}

/// Walks the AST in source order so placeholders are numbered as bound
struct Lowering {
    placeholders: usize,
}

impl Lowering {
    fn statement(&mut self, statement: SqlStatement) -> Result<Statement, DriverError> {
        match statement {
            SqlStatement::ShowTables { .. } => Ok(Statement::ShowTables),
            SqlStatement::ShowColumns { table_name, .. } => Ok(Statement::ShowColumns {
                table: object_name(&table_name)?,
            }),
            SqlStatement::Query(query) => self.select(*query),
            SqlStatement::Insert {
                table_name,
                columns,
                source,
                on,
                ..
            } => self.insert(table_name, columns, source.into(), on),
            SqlStatement::Delete {
                from, selection, ..
            } => {
                let table = single_table(&from)?;
                let filter = match selection {
                    Some(expr) => Some(self.expr(expr)?),
                    None => None,
                };
                Ok(Statement::Delete { table, filter })
            }
            SqlStatement::LockTables { tables, .. } => Ok(Statement::LockTables {
                tables: tables.into_iter().map(|lock| lock.table.value).collect(),
            }),
            SqlStatement::UnlockTables { .. } => Ok(Statement::UnlockTables),
            other => Err(syntax(format!("unsupported statement: {}", other))),
        }
    }

    fn select(&mut self, query: Query) -> Result<Statement, DriverError> {
        let Query {
            body,
            order_by,
            limit,
            offset,
            ..
        } = query;
        let select = match *body {
            SetExpr::Select(select) => *select,
            other => return Err(unsupported("query body", other)),
        };

        let projection = match select.projection.as_slice() {
            [SelectItem::Wildcard(_)] => Projection::All,
            [SelectItem::UnnamedExpr(SqlExpr::Function(function))]
                if function.name.to_string().eq_ignore_ascii_case("COUNT") =>
            {
                Projection::Count
            }
            items => Projection::Columns(
                items
                    .iter()
                    .map(|item| match item {
                        SelectItem::UnnamedExpr(expr) => column_name(expr),
                        other => Err(unsupported("select item", other)),
                    })
                    .collect::<Result<_, _>>()?,
            ),
        };

        let table = single_table(&select.from)?;
        let filter = match select.selection {
            Some(expr) => Some(self.expr(expr)?),
            None => None,
        };

        let order = order_by
            .iter()
            .map(|item| Ok((column_name(&item.expr)?, item.asc.unwrap_or(true))))
            .collect::<Result<Vec<_>, DriverError>>()?;

        let limit = match (limit, offset) {
            (Some(count), offset) => {
                let skip = match offset {
                    Some(offset) => unsigned(&offset.value)?,
                    None => 0,
                };
                Some((skip, unsigned(&count)?))
            }
            (None, Some(_)) => return Err(syntax("OFFSET without LIMIT".to_string())),
            (None, None) => None,
        };

        Ok(Statement::Select {
            table,
            projection,
            filter,
            order,
            limit,
        })
    }

    fn insert(
        &mut self,
        table_name: ObjectName,
        columns: Vec<Ident>,
        source: Option<Box<Query>>,
        on: Option<OnInsert>,
    ) -> Result<Statement, DriverError> {
        let table = object_name(&table_name)?;
        let columns = columns.into_iter().map(|c| c.value).collect();

        let source = source.ok_or_else(|| syntax("INSERT without VALUES".to_string()))?;
        let mut rows = match *source.body {
            SetExpr::Values(values) => values.rows,
            other => return Err(unsupported("INSERT source", other)),
        };
        if rows.len() != 1 {
            return Err(syntax(format!("expected one VALUES row, found {}", rows.len())));
        }
        let values = rows
            .remove(0)
            .into_iter()
            .map(|expr| self.operand(expr))
            .collect::<Result<Vec<_>, _>>()?;

        let on_duplicate = match on {
            None => Vec::new(),
            Some(OnInsert::DuplicateKeyUpdate(assignments)) => assignments
                .into_iter()
                .map(|assignment| self.assignment(assignment))
                .collect::<Result<Vec<_>, _>>()?,
            Some(other) => return Err(unsupported("conflict clause", other)),
        };

        Ok(Statement::Insert {
            table,
            columns,
            values,
            on_duplicate,
        })
    }

    fn assignment(&mut self, assignment: Assignment) -> Result<(String, Operand), DriverError> {
        let column = assignment
            .id
            .last()
            .map(|ident| ident.value.clone())
            .ok_or_else(|| syntax("empty assignment target".to_string()))?;

        let value = match assignment.value {
            SqlExpr::Function(function) if function.name.to_string().eq_ignore_ascii_case("VALUES") => {
                match function.args.as_slice() {
                    [FunctionArg::Unnamed(FunctionArgExpr::Expr(expr))] => {
                        Operand::Inserted(column_name(expr)?)
                    }
                    other => return Err(unsupported("VALUES() argument", other)),
                }
            }
            other => self.operand(other)?,
        };
        Ok((column, value))
    }

    fn expr(&mut self, expr: SqlExpr) -> Result<Expr, DriverError> {
        match expr {
            SqlExpr::Nested(inner) => self.expr(*inner),
            SqlExpr::BinaryOp {
                left,
                op: BinaryOperator::And,
                right,
            } => {
                let left = self.expr(*left)?;
                let right = self.expr(*right)?;
                Ok(Expr::And(Box::new(left), Box::new(right)))
            }
            SqlExpr::BinaryOp {
                left,
                op: BinaryOperator::Or,
                right,
            } => {
                let left = self.expr(*left)?;
                let right = self.expr(*right)?;
                Ok(Expr::Or(Box::new(left), Box::new(right)))
            }
            SqlExpr::BinaryOp { left, op, right } => {
                let op = comparison(&op).ok_or_else(|| unsupported("operator", &op))?;
                let left = self.operand(*left)?;
                let right = self.operand(*right)?;
                Ok(Expr::Compare(left, op, right))
            }
            SqlExpr::UnaryOp {
                op: UnaryOperator::Not,
                expr,
            } => Ok(Expr::Not(Box::new(self.expr(*expr)?))),
            SqlExpr::IsNull(inner) => Ok(Expr::IsNull {
                operand: self.operand(*inner)?,
                negated: false,
            }),
            SqlExpr::IsNotNull(inner) => Ok(Expr::IsNull {
                operand: self.operand(*inner)?,
                negated: true,
            }),
            SqlExpr::InList {
                expr,
                list,
                negated,
            } => {
                let operand = self.operand(*expr)?;
                let list = list
                    .into_iter()
                    .map(|item| self.operand(item))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Expr::InList {
                    operand,
                    list,
                    negated,
                })
            }
            SqlExpr::Like {
                negated,
                expr,
                pattern,
                ..
            } => {
                let operand = self.operand(*expr)?;
                let pattern = self.operand(*pattern)?;
                Ok(Expr::Like {
                    operand,
                    pattern,
                    negated,
                })
            }
            SqlExpr::RLike {
                negated,
                expr,
                pattern,
                ..
            } => {
                let operand = self.operand(*expr)?;
                let pattern = self.operand(*pattern)?;
                Ok(Expr::Regexp {
                    operand,
                    pattern,
                    negated,
                })
            }
            other => Err(syntax(format!("unsupported expression: {}", other))),
        }
    }

    fn operand(&mut self, expr: SqlExpr) -> Result<Operand, DriverError> {
        match expr {
            column @ (SqlExpr::Identifier(_) | SqlExpr::CompoundIdentifier(_)) => {
                column_name(&column).map(Operand::Column)
            }
            SqlExpr::Nested(inner) => self.operand(*inner),
            SqlExpr::Value(SqlValue::Placeholder(_)) => {
                let index = self.placeholders;
                self.placeholders += 1;
                Ok(Operand::Param(index))
            }
            SqlExpr::Value(value) => literal(value).map(Operand::Literal),
            SqlExpr::UnaryOp {
                op: UnaryOperator::Minus,
                expr,
            } => match *expr {
                SqlExpr::Value(SqlValue::Number(text, _)) => {
                    number(&format!("-{}", text)).map(Operand::Literal)
                }
                other => Err(syntax(format!("unsupported negated operand: {}", other))),
            },
            other => Err(syntax(format!("unsupported operand: {}", other))),
        }
    }
}
