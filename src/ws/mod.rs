//! Live search over a websocket.

pub mod dispatcher;
pub mod protocol;

pub use dispatcher::run_session;
pub use protocol::{BrowserOp, BrowserQuery};
