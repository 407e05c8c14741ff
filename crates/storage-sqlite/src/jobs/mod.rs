mod model;
mod repository;

pub use model::JobRow;
pub use repository::SqliteJobStore;
