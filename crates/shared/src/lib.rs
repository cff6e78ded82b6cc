pub mod codec;
pub mod error;
pub mod logging;
