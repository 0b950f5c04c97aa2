use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use log::debug;
use tokio::task::block_in_place;

use crate::cli::SubCommandExtend;
use crate::config::{Opts, SearchOptions};
use crate::finder::FinderConfig;
use crate::similarity::SearchHit;

#[derive(Parser, Debug, Clone)]
pub struct SearchCommand {
    #[command(flatten)]
    pub search: SearchOptions,
    /// 被搜索的图片路径
    pub image: PathBuf,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", value_enum, default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for SearchCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let config = self.search.finder_config(FinderConfig::default().request_ttl);
        let finder = opts.open_finder(config)?;

        let stats = block_in_place(|| finder.load_all())?;
        debug!("已加载 {} 张图片", stats.loaded);

        let query = block_in_place(|| finder.query_from_path(&self.image))?;
        let result = block_in_place(|| finder.rank(&query.fingerprint, &config.rank))?;

        print_result(&result, self.output_format)
    }
}

fn print_result(result: &[SearchHit], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(result)?)
        }
        OutputFormat::Table => {
            for hit in result {
                println!("{:.4}\t{}", hit.score, hit.identity);
            }
        }
    }
    Ok(())
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum OutputFormat {
    Json,
    Table,
}
