pub mod app;
pub mod commands;
pub mod context;
pub mod dispatch;
pub mod env;
pub mod maintenance;
pub mod runtime;
pub mod serve;

pub use app::run;
pub use commands::Commands;
pub use context::CliContext;
pub use env::CliArgs;
pub use serve::{cmd_serve, ServeArgs};
