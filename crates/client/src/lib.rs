// tandem-client: joins rooms on a relay and binds a local replica to an editor.

pub mod accessor;
pub mod config;
pub mod execution;
pub mod files;
pub mod reconnect;
pub mod session;

pub use accessor::{BufferAccessor, DocumentContentAccessor, LocalChangeSink};
pub use config::ClientConfig;
pub use execution::{CodeExecutor, ExecutionError, PistonExecutor};
pub use files::{FileStore, MemoryFileStore, SqliteFileStore};
pub use reconnect::ReconnectPolicy;
pub use session::{CollabSession, SessionError, SessionEvent, SessionOptions, SessionStatus, SubscriptionId};
