//! Filter parsing, SQL composition and in-process matching

pub mod compiler;
pub mod expression;
pub mod filter;
pub mod matcher;

pub use compiler::{QueryCompiler, QueryPlan, ResolvedCollection};
pub use expression::{like_to_regex, Expression, ExpressionParser, Operator, Term};
pub use filter::{Filter, Limit, RawFragment, RecordComparator, SortDirective};
pub use matcher::RecordMatcher;

/// Quote an identifier with backticks, doubling embedded backticks
pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_identifiers() {
        assert_eq!(quote_identifier("Widgets"), "`Widgets`");
        assert_eq!(quote_identifier("@contents"), "`@contents`");
        assert_eq!(quote_identifier("we`ird"), "`we``ird`");
    }
}
