pub(crate) mod engine_builder;
pub mod dispatch;
pub mod maven;
pub mod matrix;
pub mod provision;
pub mod run;

pub use dispatch::dispatch;
