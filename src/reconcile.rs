use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info};
use tokio::sync::watch;
use tokio::task::{JoinHandle, spawn_blocking};
use tokio::time::{Instant, MissedTickBehavior, interval};

use crate::finder::{ImageFinder, RefreshOutcome};
use crate::metrics;

/// 两个后台任务的周期
#[derive(Debug, Clone, Copy)]
pub struct ReconcileIntervals {
    /// 图片目录同步周期
    pub refresh: Duration,
    /// 暂存结果清理周期
    pub sweep: Duration,
}

impl Default for ReconcileIntervals {
    fn default() -> Self {
        Self { refresh: Duration::from_secs(2 * 60), sweep: Duration::from_secs(60) }
    }
}

/// 后台同步任务
///
/// 包含两个互不相关的周期任务：图片目录同步和暂存结果清理。
/// 每个周期的错误只会被记录，不会终止任务。
pub struct Reconciler {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl Reconciler {
    /// 在当前 tokio 运行时中启动两个后台任务
    pub fn spawn(finder: Arc<ImageFinder>, intervals: ReconcileIntervals) -> Self {
        let (shutdown, rx) = watch::channel(false);
        let handles = vec![
            tokio::spawn(refresh_loop(finder.clone(), intervals.refresh, rx.clone())),
            tokio::spawn(sweep_loop(finder, intervals.sweep, rx)),
        ];
        Self { shutdown, handles }
    }

    /// 停止调度新的周期，并等待正在执行的周期结束
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!("后台任务异常退出: {e}");
            }
        }
        info!("后台任务已停止");
    }
}

async fn refresh_loop(finder: Arc<ImageFinder>, period: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        // 第一次 tick 立即返回，启动时先同步一次
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }

        let finder = finder.clone();
        match spawn_blocking(move || finder.refresh()).await {
            Ok(Ok(RefreshOutcome::Unchanged)) => metrics::inc_refresh("unchanged"),
            Ok(Ok(RefreshOutcome::Reloaded(stats))) => {
                debug!("图片同步完成: {stats:?}");
                metrics::inc_refresh("reloaded");
            }
            Ok(Err(e)) => {
                error!("图片同步失败: {e}");
                metrics::inc_refresh("error");
            }
            Err(e) => {
                error!("图片同步任务异常: {e}");
                metrics::inc_refresh("error");
            }
        }
    }
}

async fn sweep_loop(finder: Arc<ImageFinder>, period: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // 跳过立即返回的第一次 tick，启动后等待一个周期再清理
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }
        finder.sweep(Instant::now());
    }
}
