use anyhow::Result;
use clap::Parser;
use indicatif::ProgressBar;
use log::info;
use tokio::task::block_in_place;

use crate::cli::SubCommandExtend;
use crate::config::Opts;
use crate::utils::pb_style;

#[derive(Parser, Debug, Clone)]
pub struct UpdateCommand {}

impl SubCommandExtend for UpdateCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let store = opts.open_store()?;
        let extractor = opts.extractor();
        info!("开始扫描目录: {}", store.images_dir().display());

        let pb = ProgressBar::no_length().with_style(pb_style());
        let set = block_in_place(|| store.load_or_compute_with_progress(extractor.as_ref(), pb))?;

        println!(
            "{} 张图片：缓存 {}，计算 {}，失败 {}",
            set.entries.len(),
            set.cached,
            set.computed,
            set.failed
        );
        Ok(())
    }
}
