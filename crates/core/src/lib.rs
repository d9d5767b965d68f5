pub mod client;
pub mod error;
pub mod media;
pub mod protocol;
pub mod session;
pub mod sink;
pub mod transport;

pub use client::{Client, ClientConfig, Status, StatusCallback};
pub use error::{ClientError, Result};
pub use session::SessionState;
pub use sink::{FileCache, Frame, FrameCache, MemoryCache};
pub use transport::MediaStats;
