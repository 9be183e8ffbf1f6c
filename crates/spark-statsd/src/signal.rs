//! 工作线程的生命周期信号：结束闩锁与中断标志。

use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};

/// 一次性倒计数闩锁。
///
/// # 教案式说明
/// - **意图 (Why)**：每个工作线程在循环退出时恰好倒数一次，门面据此等待排空完成；
/// - **契约 (What)**：计数归零后保持为零，多余的 `count_down` 被忽略；
///   `wait_timeout` 返回 `true` 表示在期限内归零。
#[derive(Debug)]
pub struct EndSignal {
    remaining: Mutex<usize>,
    zero: Condvar,
}

impl EndSignal {
    pub fn new(count: usize) -> Self {
        Self {
            remaining: Mutex::new(count),
            zero: Condvar::new(),
        }
    }

    /// 倒数一次，归零时唤醒全部等待者。
    pub fn count_down(&self) {
        let mut remaining = self.remaining.lock();
        if *remaining == 0 {
            return;
        }
        *remaining -= 1;
        if *remaining == 0 {
            self.zero.notify_all();
        }
    }

    /// 当前剩余计数。
    pub fn count(&self) -> usize {
        *self.remaining.lock()
    }

    /// 阻塞直至归零。
    pub fn wait(&self) {
        let mut remaining = self.remaining.lock();
        while *remaining > 0 {
            self.zero.wait(&mut remaining);
        }
    }

    /// 最多等待 `timeout`。
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut remaining = self.remaining.lock();
        while *remaining > 0 {
            if self.zero.wait_until(&mut remaining, deadline).timed_out() {
                return *remaining == 0;
            }
        }
        true
    }
}

/// 单个工作线程的中断状态。
///
/// 语义与线程中断位一致：`interrupt` 置位，阻塞点通过 `take` 读取并清除。
#[derive(Debug, Default)]
pub struct InterruptFlag {
    raised: AtomicBool,
}

impl InterruptFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interrupt(&self) {
        self.raised.store(true, Ordering::Release);
    }

    /// 读取并清除中断位。
    pub fn take(&self) -> bool {
        self.raised.swap(false, Ordering::AcqRel)
    }

    pub fn is_set(&self) -> bool {
        self.raised.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, thread};

    #[test]
    fn latch_releases_waiters_at_zero() {
        let signal = Arc::new(EndSignal::new(2));
        let waiter = {
            let signal = Arc::clone(&signal);
            thread::spawn(move || signal.wait_timeout(Duration::from_secs(5)))
        };
        signal.count_down();
        assert!(!signal.wait_timeout(Duration::from_millis(5)));
        signal.count_down();
        signal.count_down();
        assert_eq!(signal.count(), 0);
        assert!(waiter.join().expect("等待线程不应 panic"));
    }

    #[test]
    fn interrupt_is_consumed_by_take() {
        let flag = InterruptFlag::new();
        assert!(!flag.take());
        flag.interrupt();
        assert!(flag.is_set());
        assert!(flag.take());
        assert!(!flag.is_set());
    }
}
