pub mod configuration;
pub mod error;
pub mod routes;
pub mod state;
pub mod stream;

pub use error::*;
pub use state::*;
