//! Reference tables, output schema and the instrument-day store

pub mod schema;
pub mod store;
pub mod universe;

pub use schema::{EventSchema, SchemaError};
pub use store::{DateManifest, InstrumentDayStore, ManifestEntry, StoreError};
pub use universe::{InstrumentUniverse, LimitUpEntry, LimitUpTable, UniverseError};
