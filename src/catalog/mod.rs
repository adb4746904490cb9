pub mod schema;
pub mod store;

pub use store::{Catalog, SearchHit, Stats};
