//! Search body `query` handling: DSL parse, `query_string` syntax and
//! compilation into an [`ExecutableQuery`](quarry::query::ExecutableQuery).

mod compiler;
pub mod dsl;
mod query_string;

pub use compiler::QueryCompiler;
pub use dsl::{
    BoolQuery, Fuzziness, MatchQuery, MinimumShouldMatch, MultiMatchType, QueryNode,
    QueryStringQuery,
};
