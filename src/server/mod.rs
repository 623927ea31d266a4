//! Line-delimited JSON-RPC surface over the engine
//!
//! One request per stdin line, one response per stdout line. Background
//! work reports back through notifications with a null id.
//!
//! # Module Structure
//! - `protocol` - JSON-RPC request/response types
//! - `state` - Server state: engine, loaded items, background work
//! - `handlers` - Request handlers organized by functionality

pub mod handlers;
pub mod protocol;
pub mod state;

pub use handlers::{dispatch, poll_background};
pub use protocol::{error_codes, ErrorResponse, Request, Response};
pub use state::{PopulateAsyncResult, ServerState};
