pub mod cancel;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod progress;
