//! Domain models for timebilling-service.

pub mod invoice;
pub mod preview;
pub mod time_entry;

pub use invoice::*;
pub use preview::*;
pub use time_entry::*;
