use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Parser;
use log::info;
use tokio::task::block_in_place;

use crate::cli::SubCommandExtend;
use crate::config::{Opts, SearchOptions};
use crate::error::FinderError;
use crate::finder::{FinderConfig, ImageFinder};

#[derive(Parser, Debug, Clone)]
pub struct AddCommand {
    #[command(flatten)]
    pub search: SearchOptions,
    /// 要添加的图片路径
    #[arg(required = true)]
    pub images: Vec<PathBuf>,
}

impl SubCommandExtend for AddCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let config = self.search.finder_config(FinderConfig::default().request_ttl);
        let finder = opts.open_finder(config)?;

        let stats = block_in_place(|| finder.load_all())?;
        info!("已加载 {} 张图片", stats.loaded);

        for image in &self.images {
            match block_in_place(|| add_one(&finder, image)) {
                Ok(location) => println!("[OK] {} -> {}", image.display(), location.display()),
                Err(FinderError::Conflict { location }) => {
                    println!("[EXISTS] {} -> {}", image.display(), location.display())
                }
                Err(e) => eprintln!("[ERR] {}: {}", image.display(), e),
            }
        }
        Ok(())
    }
}

/// 先检索，再提交入库
fn add_one(finder: &ImageFinder, image: &Path) -> Result<PathBuf, FinderError> {
    let query = finder.query_from_path(image)?;
    let outcome = finder.search(query, &finder.config().rank)?;
    let request_id = outcome
        .request_id
        .ok_or_else(|| FinderError::NotFound(image.display().to_string()))?;
    finder.commit(&request_id)
}
