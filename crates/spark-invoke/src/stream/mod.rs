//! # stream 模块说明
//!
//! ## 角色定位（Why）
//! - 管理多值结果的“流条目”：每个 `correlation-id` 至多一个条目，条目在完成、失败、取消、
//!   调用方消失或 Supervisor 停止时被释放；
//! - 控制面（`cancel` / `suspend` / `resume`）通过条目的命令通道送达，由条目自身的任务串行处理。
//!
//! ## 设计要求（What）
//! - 创建使用“不存在才插入”，重复的关联标识被忽略；
//! - 释放只由条目自己的任务发起，并按纪元（epoch）匹配，旧条目的释放不会误删同一标识的新条目；
//! - 所有取消路径幂等：向已结束条目发送命令会被忽略，释放只计数一次。
//!
//! ## 风险提示（Trade-offs）
//! - 容量上限是软限制：检查与插入之间不持锁，高并发下可能短暂超出一个条目。

mod entry;
mod liveness;

use std::{
    fmt,
    str::FromStr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use dashmap::{DashMap, mapref::entry::Entry};
use tokio::sync::mpsc;
use tracing::trace;

pub(crate) use entry::StreamEntry;

use crate::error::InvokeError;

/// 出站的完成信号，只由服务端发送。
pub const COMPLETE: &str = "complete";

/// 入站控制命令。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ControlCommand {
    /// 终止流条目。
    Cancel,
    /// 停止拉取新的值。
    Suspend,
    /// 恢复拉取。
    Resume,
}

impl ControlCommand {
    /// `control` 头取值。
    pub fn as_str(self) -> &'static str {
        match self {
            ControlCommand::Cancel => "cancel",
            ControlCommand::Suspend => "suspend",
            ControlCommand::Resume => "resume",
        }
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ControlCommand {
    type Err = InvokeError;

    /// `complete` 只在出站方向有意义，入站时与其它未知取值一样返回 [`InvokeError::UnknownControl`]。
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "cancel" => Ok(ControlCommand::Cancel),
            "suspend" => Ok(ControlCommand::Suspend),
            "resume" => Ok(ControlCommand::Resume),
            other => Err(InvokeError::UnknownControl {
                value: other.to_owned(),
            }),
        }
    }
}

/// 流条目统计快照。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// 当前存活的条目数。
    pub active: usize,
    /// 累计创建的条目数。
    pub created_total: u64,
    /// 累计释放的条目数，每个条目恰好计一次。
    pub released_total: u64,
}

/// 准入结果。
#[derive(Debug)]
pub(crate) enum Admission {
    Admitted(StreamTicket),
    Duplicate,
    AtCapacity(usize),
}

/// 准入成功后交给条目任务的凭据。
#[derive(Debug)]
pub(crate) struct StreamTicket {
    pub(crate) correlation_id: Arc<str>,
    pub(crate) epoch: u64,
    pub(crate) commands: mpsc::UnboundedReceiver<ControlCommand>,
}

struct StreamSlot {
    epoch: u64,
    commands: mpsc::UnboundedSender<ControlCommand>,
}

/// 以关联标识为键的流条目表，是 Supervisor 唯一的共享可变状态。
///
/// # 教案式说明
/// - **意图 (Why)**：控制消息与条目任务运行在不同任务上，需要一张并发表完成“查找并投递命令”；
/// - **契约 (What)**：
///   - [`StreamTable::admit`] 原子地“不存在才插入”，在 `DashMap` 的分片锁释放后才返回凭据，
///     调用方在锁外启动条目任务；
///   - [`StreamTable::release`] 仅移除纪元匹配的槽位，成功移除时累加 `released_total`；
/// - **执行 (How)**：槽位只保存纪元与命令发送端，条目的其余状态由条目任务独占。
#[derive(Default)]
pub(crate) struct StreamTable {
    slots: DashMap<Arc<str>, StreamSlot>,
    next_epoch: AtomicU64,
    created_total: AtomicU64,
    released_total: AtomicU64,
}

impl StreamTable {
    pub(crate) fn admit(&self, correlation_id: &str, max_streams: Option<usize>) -> Admission {
        if self.slots.contains_key(correlation_id) {
            return Admission::Duplicate;
        }
        if let Some(limit) = max_streams
            && self.slots.len() >= limit
        {
            return Admission::AtCapacity(limit);
        }

        let key: Arc<str> = Arc::from(correlation_id);
        let ticket = match self.slots.entry(Arc::clone(&key)) {
            Entry::Occupied(_) => return Admission::Duplicate,
            Entry::Vacant(vacant) => {
                let epoch = self.next_epoch.fetch_add(1, Ordering::Relaxed);
                let (commands, receiver) = mpsc::unbounded_channel();
                vacant.insert(StreamSlot { epoch, commands });
                StreamTicket {
                    correlation_id: key,
                    epoch,
                    commands: receiver,
                }
            }
        };
        self.created_total.fetch_add(1, Ordering::Relaxed);
        Admission::Admitted(ticket)
    }

    /// 向条目投递命令；标识未知或条目已结束时返回 `false`。
    pub(crate) fn send_command(&self, correlation_id: &str, command: ControlCommand) -> bool {
        self.slots
            .get(correlation_id)
            .is_some_and(|slot| slot.commands.send(command).is_ok())
    }

    /// 向所有条目投递取消命令，返回投递数量。
    pub(crate) fn cancel_all(&self) -> usize {
        let mut cancelled = 0;
        for slot in self.slots.iter() {
            if slot.commands.send(ControlCommand::Cancel).is_ok() {
                cancelled += 1;
            }
        }
        cancelled
    }

    pub(crate) fn release(&self, correlation_id: &str, epoch: u64) -> bool {
        let released = self
            .slots
            .remove_if(correlation_id, |_, slot| slot.epoch == epoch)
            .is_some();
        if released {
            self.released_total.fetch_add(1, Ordering::Relaxed);
        } else {
            trace!(correlation_id, epoch, "stale release ignored");
        }
        released
    }

    pub(crate) fn stats(&self) -> StreamStats {
        StreamStats {
            active: self.slots.len(),
            created_total: self.created_total.load(Ordering::Relaxed),
            released_total: self.released_total.load(Ordering::Relaxed),
        }
    }
}
