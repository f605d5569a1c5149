pub mod base;
pub mod errors;
pub mod formats;
pub mod mock;
pub mod openai;
pub mod utils;
