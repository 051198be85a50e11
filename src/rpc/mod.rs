mod server;
mod types;

pub use server::{create_router, run_http_server, run_stdio_server, AppState, ServiceError};
pub use types::*;
