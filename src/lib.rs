pub mod cli;
pub mod config;
pub mod error;
pub mod extract;
pub mod finder;
pub mod fingerprint;
pub mod index;
mod metrics;
pub mod pending;
pub mod reconcile;
pub mod similarity;
pub mod store;
pub mod utils;

pub use config::Opts;
pub use error::FinderError;
pub use finder::{FinderConfig, ImageFinder};
pub use reconcile::{ReconcileIntervals, Reconciler};
