//! Public API: database handle, builder-pattern CRUD, predicates and query results.

pub mod builders;
pub mod database;
pub mod options;
pub mod predicate;
pub mod query;
pub mod validate;

pub use builders::{
    AddBuilder, BatchImportBuilder, DeleteBuilder, FindBuilder, FindOneBuilder, UpdateBuilder,
};
pub use database::ShelfDB;
pub use options::OpenOptions;
pub use predicate::{Operator, Predicate};
pub use query::{MatchIter, Matches};
pub use validate::{RequiredFields, Validator};
