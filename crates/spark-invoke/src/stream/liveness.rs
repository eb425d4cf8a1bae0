//! 调用方存活监控。
//!
//! # 教案式说明
//! - **意图 (Why)**：传输层不报告断连，流条目需要通过 `reply-to` 的监听状态判断调用方是否仍在；
//! - **契约 (What)**：
//!   - 先订阅状态流，再查询 `is_anyone_listening` 快照并以快照为准，
//!     订阅与查询之间发生的变化会在状态流中再次出现，不会丢失；
//!   - 状态流产出错误或结束都视为监控异常，由条目任务取消自身并以 warn 级别记录；
//!   - 关闭监控时 [`LivenessMonitor::next_signal`] 永不完成。

use std::future;

use futures::StreamExt;

use crate::{
    bus::{EventBus, ListenerStatus, ListenerStatusStream},
    event::Cri,
};

/// 需要终止条目的存活信号。
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum LivenessSignal {
    /// 调用方不再监听。
    CallerGone,
    /// 存活监控本身失效。
    Anomaly(String),
}

pub(crate) struct LivenessMonitor {
    feed: Option<ListenerStatusStream>,
}

impl LivenessMonitor {
    pub(crate) fn disabled() -> Self {
        Self { feed: None }
    }

    /// 订阅并对齐快照；快照表明调用方已不在时直接返回终止信号。
    pub(crate) async fn attach(bus: &dyn EventBus, reply_to: &Cri) -> Result<Self, LivenessSignal> {
        let feed = bus.monitor_listener_status(reply_to);
        match bus.is_anyone_listening(reply_to).await {
            Ok(true) => Ok(Self { feed: Some(feed) }),
            Ok(false) => Err(LivenessSignal::CallerGone),
            Err(err) => Err(LivenessSignal::Anomaly(format!("liveness snapshot failed: {err}"))),
        }
    }

    /// 等待下一个终止信号，`Active` 状态被跳过。
    pub(crate) async fn next_signal(&mut self) -> LivenessSignal {
        let Some(feed) = self.feed.as_mut() else {
            return future::pending().await;
        };
        loop {
            match feed.next().await {
                Some(Ok(ListenerStatus::Active)) => continue,
                Some(Ok(ListenerStatus::Inactive)) => return LivenessSignal::CallerGone,
                Some(Err(err)) => return LivenessSignal::Anomaly(format!("liveness feed failed: {err}")),
                None => return LivenessSignal::Anomaly("liveness feed terminated".to_owned()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::bus::LocalBus;

    #[tokio::test]
    async fn absent_caller_is_detected_by_snapshot() {
        let bus = LocalBus::new();
        let signal = LivenessMonitor::attach(&bus, &Cri::service("caller"))
            .await
            .err();
        assert_eq!(signal, Some(LivenessSignal::CallerGone));
    }

    #[tokio::test]
    async fn caller_leaving_after_attach_is_signalled() {
        let bus = LocalBus::new();
        let address = Cri::service("caller");
        let subscription = bus.listen(&address).await.expect("listen");

        let mut monitor = LivenessMonitor::attach(&bus, &address)
            .await
            .unwrap_or_else(|signal| panic!("caller present, got {signal:?}"));
        drop(subscription);
        assert_eq!(monitor.next_signal().await, LivenessSignal::CallerGone);
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_monitor_never_signals() {
        let mut monitor = LivenessMonitor::disabled();
        let waited = tokio::time::timeout(Duration::from_secs(60), monitor.next_signal()).await;
        assert!(waited.is_err());
    }
}
