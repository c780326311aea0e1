pub mod config;
pub mod envelope;
pub mod error;
pub mod registry;
pub mod session;
pub mod writer;

pub use error::EngineError;
pub use registry::{SessionInfo, SessionRegistry};
pub use session::{Session, SessionContext};
