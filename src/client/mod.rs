//! API client with silent refresh-and-retry. See [`SessionAgent`].

mod session;

pub use session::{ClientError, SessionAgent, SessionEvent};
