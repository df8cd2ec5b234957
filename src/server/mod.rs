mod ask;
pub mod config;
mod http_layers;
mod index;
mod search;
pub mod server;
pub mod state;

pub use config::ServerConfig;
pub use http_layers::*;
pub use server::{build_state, make_app, run_server};
pub use state::ServerState;
