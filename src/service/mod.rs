//! Request execution: the CRUD executors and record validation.

pub mod crud;
pub mod validation;

pub use crud::CrudExecutor;
pub use validation::RecordValidator;
