pub mod config;
pub mod error;
pub mod labels;
pub mod load;
pub mod logging;
pub mod pipeline;
pub mod quality;
pub mod stage;
pub mod store;
pub mod warehouse;

pub use error::{EtlError, Result};
