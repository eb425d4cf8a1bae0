//! 流条目任务：串行处理命令、存活信号与值源。
//!
//! # 教案式说明
//! - **意图 (Why)**：同一条流上的所有副作用（推送值、完成、错误、取消、释放）都由一个任务完成，
//!   天然保证推送顺序与“只释放一次”；
//! - **契约 (What)**：
//!   - `select!` 使用 `biased`，优先级依次为命令、存活信号、值源；值源仅在需求开放时被拉取；
//!   - 值源完成发送 `control=complete`；值源失败或值转换失败发送错误回包；
//!   - 调用方消失、存活监控异常或收到取消时不再发送任何回包；
//!   - 无论以何种方式结束，最后都按纪元释放表中的槽位；
//! - **风险 (Trade-offs)**：挂起期间值源不被轮询，依赖值源自身是惰性的；热源需要自行缓冲。

use std::sync::Arc;

use futures::{StreamExt, stream::BoxStream};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use super::{
    ControlCommand, StreamTable, StreamTicket,
    liveness::{LivenessMonitor, LivenessSignal},
};
use crate::{
    error::{Fault, MethodError, codes},
    event::{Cri, Headers},
    registry::ReturnType,
    supervisor::reply::Replier,
};

/// 条目结束的原因。
#[derive(Debug)]
enum Outcome {
    Completed,
    Failed(&'static str),
    Cancelled,
    CallerGone,
    LivenessAnomaly(String),
}

impl From<LivenessSignal> for Outcome {
    fn from(signal: LivenessSignal) -> Self {
        match signal {
            LivenessSignal::CallerGone => Outcome::CallerGone,
            LivenessSignal::Anomaly(detail) => Outcome::LivenessAnomaly(detail),
        }
    }
}

pub(crate) struct StreamEntry {
    pub(crate) service: Arc<str>,
    pub(crate) method: Arc<str>,
    pub(crate) ticket: StreamTicket,
    pub(crate) request: Headers,
    pub(crate) reply_to: Cri,
    pub(crate) return_type: ReturnType,
    pub(crate) source: BoxStream<'static, Result<Value, MethodError>>,
    pub(crate) replier: Replier,
    pub(crate) table: Arc<StreamTable>,
    pub(crate) monitor_liveness: bool,
}

impl StreamEntry {
    /// 运行至条目结束，并释放槽位。
    pub(crate) async fn run(self) {
        let StreamEntry {
            service,
            method,
            ticket:
                StreamTicket {
                    correlation_id,
                    epoch,
                    mut commands,
                },
            request,
            reply_to,
            return_type,
            mut source,
            replier,
            table,
            monitor_liveness,
        } = self;

        let liveness = if monitor_liveness {
            LivenessMonitor::attach(replier.bus().as_ref(), &reply_to).await
        } else {
            Ok(LivenessMonitor::disabled())
        };
        let outcome = match liveness {
            Ok(mut liveness) => {
                pump(
                    &mut commands,
                    &mut liveness,
                    &mut source,
                    &replier,
                    &request,
                    return_type,
                )
                .await
            }
            Err(signal) => signal.into(),
        };
        drop(source);

        match &outcome {
            Outcome::Completed => debug!(%service, %method, %correlation_id, "stream completed"),
            Outcome::Failed(code) => debug!(%service, %method, %correlation_id, code, "stream failed"),
            Outcome::Cancelled => debug!(%service, %method, %correlation_id, "stream cancelled"),
            Outcome::CallerGone => {
                debug!(%service, %method, %correlation_id, %reply_to, "caller disappeared, stream terminated")
            }
            Outcome::LivenessAnomaly(detail) => warn!(
                %service,
                %method,
                %correlation_id,
                %reply_to,
                detail = detail.as_str(),
                "liveness monitoring failed, stream cancelled"
            ),
        }
        table.release(&correlation_id, epoch);
    }
}

async fn pump(
    commands: &mut mpsc::UnboundedReceiver<ControlCommand>,
    liveness: &mut LivenessMonitor,
    source: &mut BoxStream<'static, Result<Value, MethodError>>,
    replier: &Replier,
    request: &Headers,
    return_type: ReturnType,
) -> Outcome {
    let mut demand_open = true;
    loop {
        tokio::select! {
            biased;
            command = commands.recv() => match command {
                Some(ControlCommand::Suspend) => {
                    trace!("stream suspended");
                    demand_open = false;
                }
                Some(ControlCommand::Resume) => {
                    trace!("stream resumed");
                    demand_open = true;
                }
                Some(ControlCommand::Cancel) | None => break Outcome::Cancelled,
            },
            signal = liveness.next_signal() => break signal.into(),
            item = source.next(), if demand_open => match item {
                Some(Ok(value)) => {
                    if let Err(err) = replier.send_value(request, return_type, value) {
                        replier.send_fault(request, &Fault::from(&err));
                        break Outcome::Failed(err.code());
                    }
                }
                Some(Err(err)) => {
                    replier.send_fault(request, &Fault::from(&err).with_code(codes::STREAM_FAILED));
                    break Outcome::Failed(codes::STREAM_FAILED);
                }
                None => {
                    if let Err(err) = replier.send_complete(request) {
                        warn!(error = %err, "unable to send stream completion");
                    }
                    break Outcome::Completed;
                }
            },
        }
    }
}
