use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum SchemaError {
    /// The table does not exist in the connected database
    TableNotFound(String),
    /// Column metadata could not be read
    Introspection { table: String, message: String },
    /// The table has neither a primary nor a unique key
    NoKeyColumns(String),
    /// A metadata row was missing a required attribute
    MalformedColumn { table: String, message: String },
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SchemaError::TableNotFound(table) => write!(f, "Table not found: {}", table),
            SchemaError::Introspection { table, message } => {
                write!(f, "Failed to introspect table {}: {}", table, message)
            }
            SchemaError::NoKeyColumns(table) => {
                write!(f, "Table {} has no primary or unique key", table)
            }
            SchemaError::MalformedColumn { table, message } => {
                write!(f, "Malformed column metadata for {}: {}", table, message)
            }
        }
    }
}

impl std::error::Error for SchemaError {}
