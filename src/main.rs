use clap::Parser;
use imfinder::Opts;
use imfinder::cli::SubCommandExtend;
use imfinder::config::SubCommand;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let opts = Opts::parse();

    match &opts.subcmd {
        SubCommand::Update(config) => config.run(&opts).await,
        SubCommand::Search(config) => config.run(&opts).await,
        SubCommand::Add(config) => config.run(&opts).await,
        SubCommand::Daemon(config) => config.run(&opts).await,
    }
}
