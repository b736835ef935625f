pub mod daemon;
pub mod routes;
pub mod state;

pub use daemon::{build_router, build_state, start_gateway};
pub use state::{AppState, WarmupState, WarmupStatus};
