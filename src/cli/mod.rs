mod add;
mod daemon;
mod search;
mod update;

pub use add::*;
pub use daemon::*;
pub use search::*;
pub use update::*;

use crate::config::Opts;

pub trait SubCommandExtend {
    fn run(&self, opts: &Opts) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
}
