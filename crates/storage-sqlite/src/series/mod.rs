mod model;
mod repository;

pub use model::{CacheEntryRow, SeriesRow};
pub use repository::SqliteSeriesStore;
