pub mod connection;
pub mod endpoint;
pub mod error;
pub mod record;
pub mod util;
