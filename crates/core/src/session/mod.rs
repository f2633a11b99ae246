mod manager;
mod state;

pub use manager::ConnectionManager;
pub use state::{ConnectionState, Outcome, Outgoing, SessionState, Transition};
