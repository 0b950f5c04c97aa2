use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use log::{error, info, warn};
use prometheus::{BasicAuthentication, labels};
use tokio::task::{block_in_place, spawn_blocking};
use tokio::time::{Duration, sleep};

use crate::cli::SubCommandExtend;
use crate::config::{Opts, ReconcileOptions, SearchOptions};
use crate::reconcile::Reconciler;

#[derive(Parser, Debug, Clone)]
pub struct DaemonCommand {
    #[command(flatten)]
    pub search: SearchOptions,
    #[command(flatten)]
    pub reconcile: ReconcileOptions,
    /// prometheus 主动推送地址
    #[arg(long, value_name = "URL")]
    pub prometheus_push: Option<String>,
    /// 自定义 instance 标签值
    #[arg(long, value_name = "NAME")]
    pub prometheus_instance: Option<String>,
    /// prometheus 认证信息，格式为 username:password
    #[arg(long, value_name = "AUTH")]
    pub prometheus_auth: Option<String>,
}

impl SubCommandExtend for DaemonCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let config = self.search.finder_config(self.reconcile.request_ttl());
        let finder = Arc::new(opts.open_finder(config)?);

        let stats = block_in_place(|| finder.load_all())?;
        info!("已加载 {} 张图片，其中 {} 张重新计算了特征", stats.loaded, stats.computed);

        let reconciler = Reconciler::spawn(finder, self.reconcile.intervals());

        let pusher = match self.prometheus_push.clone() {
            Some(url) => {
                let auth = self.prometheus_auth.as_deref().map(parse_auth).transpose()?;
                let instance = self.prometheus_instance.clone().unwrap_or_else(|| "imfinder".to_string());
                Some(tokio::spawn(push_metrics_loop(url, instance, auth)))
            }
            None => None,
        };

        info!("后台任务已启动，按 Ctrl-C 退出");
        tokio::signal::ctrl_c().await.context("监听退出信号失败")?;
        info!("收到退出信号，正在停止");

        if let Some(pusher) = pusher {
            pusher.abort();
        }
        reconciler.shutdown().await;

        Ok(())
    }
}

fn parse_auth(auth: &str) -> Result<(String, String)> {
    let (username, password) = auth
        .split_once(':')
        .ok_or_else(|| anyhow!("prometheus 认证信息格式应为 username:password"))?;
    Ok((username.to_string(), password.to_string()))
}

async fn push_metrics_loop(url: String, instance: String, auth: Option<(String, String)>) {
    loop {
        let metric_families = prometheus::gather();
        let url = url.clone();
        let instance = instance.clone();
        let auth = auth.clone();
        let r = spawn_blocking(move || {
            prometheus::push_metrics(
                "imfinder",
                labels! {
                    "instance".to_string() => instance,
                },
                &url,
                metric_families,
                auth.map(|(username, password)| BasicAuthentication { username, password }),
            )
        })
        .await;
        match r {
            Ok(Err(e)) => error!("推送指标失败: {e}"),
            Err(e) => warn!("推送任务异常退出: {e}"),
            Ok(Ok(())) => {}
        }
        sleep(Duration::from_secs(30)).await;
    }
}
