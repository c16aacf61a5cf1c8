// Streamgate delivery layer
//
// Resolves request paths against the configured roots and serves files,
// byte ranges and directory listings over HTTP.

pub mod http;
pub mod mime;
pub mod range;
pub mod resolve;

// Re-export commonly used types
pub use http::{create_router, AppState};
pub use resolve::{EntryKind, Resolved, Resolver};
