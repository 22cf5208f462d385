//! Types that represent the core data model, such as `Record` and `Export`.
mod amount;
mod export;
mod mapping;
mod record;

pub use amount::Amount;
pub use export::Export;
pub use mapping::{Mapping, MappingError};
pub use record::{Record, Value};
