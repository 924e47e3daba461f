//! Operator-facing operations. Each takes the [`Monitor`](crate::Monitor)
//! explicitly and returns `Result<_, String>` for the CLI to print.

pub mod alerts;
pub mod config;
pub mod credentials;
pub mod health;
