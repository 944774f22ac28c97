pub mod components;
pub mod config;
pub mod errors;
pub mod flows;
pub mod oidc;
pub mod routes;
pub mod session;
pub mod state;
pub mod telemetry;

pub use config::Config;
pub use state::AppState;
