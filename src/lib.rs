pub mod candidates;
pub mod catalog;
pub mod config;
mod error;
pub mod fetch;
pub mod harvester;
pub mod links;
pub mod logs;
pub mod pacing;
pub mod paths;
pub mod records;
pub mod render;
pub mod resolver;
pub mod runner;
pub mod session;
pub mod static_view;
pub mod upsize;

pub use error::{HarvestError, Result};
