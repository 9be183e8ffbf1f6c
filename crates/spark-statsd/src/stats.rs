use std::sync::atomic::{AtomicU64, Ordering};

/// 处理器运行期计数器。
///
/// 全部使用 `Relaxed` 原子操作：计数只用于观测，不参与任何同步决策。
#[derive(Debug, Default)]
pub(crate) struct ProcessorMetrics {
    admitted: AtomicU64,
    rejected_full: AtomicU64,
    rejected_shutdown: AtomicU64,
    packed: AtomicU64,
    too_long: AtomicU64,
    faults: AtomicU64,
    packets_forwarded: AtomicU64,
    bytes_forwarded: AtomicU64,
    packets_dropped: AtomicU64,
    abandoned: AtomicU64,
}

impl ProcessorMetrics {
    pub(crate) fn on_admitted(&self) {
        self.admitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn on_rejected_full(&self) {
        self.rejected_full.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn on_rejected_shutdown(&self) {
        self.rejected_shutdown.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn on_packed(&self) {
        self.packed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn on_too_long(&self) {
        self.too_long.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn on_fault(&self) {
        self.faults.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn on_forwarded(&self, bytes: usize) {
        self.packets_forwarded.fetch_add(1, Ordering::Relaxed);
        self.bytes_forwarded.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn on_packet_dropped(&self) {
        self.packets_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn on_abandoned(&self, count: usize) {
        self.abandoned.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> ProcessorStats {
        ProcessorStats {
            admitted: self.admitted.load(Ordering::Relaxed),
            rejected_full: self.rejected_full.load(Ordering::Relaxed),
            rejected_shutdown: self.rejected_shutdown.load(Ordering::Relaxed),
            packed: self.packed.load(Ordering::Relaxed),
            too_long: self.too_long.load(Ordering::Relaxed),
            faults: self.faults.load(Ordering::Relaxed),
            packets_forwarded: self.packets_forwarded.load(Ordering::Relaxed),
            bytes_forwarded: self.bytes_forwarded.load(Ordering::Relaxed),
            packets_dropped: self.packets_dropped.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
        }
    }
}

/// 计数器快照。
///
/// # 契约说明（What）
/// - `admitted`：`send` 返回 `true` 的次数；
/// - `rejected_full` / `rejected_shutdown`：因队列已满或已关闭而拒绝的次数；
/// - `packed`：成功写入缓冲的消息数；
/// - `too_long` / `faults`：因超长或序列化故障被丢弃的消息数；
/// - `packets_forwarded` / `bytes_forwarded`：交给出站通道的报文数与字节数；
/// - `packets_dropped`：出站通道断开或关闭期间被中断而未能转发的报文数；
/// - `abandoned`：工作线程退出后仍留在队列中、被丢弃的消息数。
///
/// 各字段独立读取，快照之间不保证彼此一致。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProcessorStats {
    pub admitted: u64,
    pub rejected_full: u64,
    pub rejected_shutdown: u64,
    pub packed: u64,
    pub too_long: u64,
    pub faults: u64,
    pub packets_forwarded: u64,
    pub bytes_forwarded: u64,
    pub packets_dropped: u64,
    pub abandoned: u64,
}
