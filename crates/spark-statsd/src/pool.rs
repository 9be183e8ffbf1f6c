use std::{collections::VecDeque, time::Duration};

use parking_lot::{Condvar, Mutex};

use crate::{buffer::PacketBuffer, error::PoolError, signal::InterruptFlag};

/// 借出等待时检查中断标志的间隔上限。
const INTERRUPT_CHECK_INTERVAL: Duration = Duration::from_millis(50);

/// `BufferPool` 持有固定数量、固定容量的报文缓冲，负责借出与回收。
///
/// # 模块角色（Why）
/// - 为打包流水线提供有界内存：缓冲只在构造时分配，此后既不新增也不销毁；
/// - 传输协作方发送完毕后必须归还缓冲，否则工作线程会在 `borrow` 上阻塞，
///   形成对整个流水线的自然背压。
///
/// # 核心机制（How）
/// - `parking_lot::Mutex<VecDeque<PacketBuffer>>` 保存空闲缓冲，`Condvar` 唤醒等待者；
/// - 等待以 [`INTERRUPT_CHECK_INTERVAL`] 为粒度分段，每段醒来检查调用方的 [`InterruptFlag`]，
///   [`wake_all`](Self::wake_all) 可让中断立即被观察到。
///
/// # 契约说明（What）
/// - **守恒**：空闲数 + 借出数恒等于 `size()`；
/// - **独占**：同一缓冲不会同时被两个调用方借出，由所有权转移保证；
/// - **回收**：`reclaim` 会清空游标，容量不符或超出总量的缓冲被拒收。
#[derive(Debug)]
pub struct BufferPool {
    idle: Mutex<VecDeque<PacketBuffer>>,
    available: Condvar,
    size: usize,
    buffer_capacity: usize,
}

impl BufferPool {
    /// 预分配 `size` 个容量为 `buffer_capacity` 的缓冲。
    pub fn new(size: usize, buffer_capacity: usize) -> Self {
        let idle = (0..size)
            .map(|_| PacketBuffer::with_capacity(buffer_capacity))
            .collect();
        Self {
            idle: Mutex::new(idle),
            available: Condvar::new(),
            size,
            buffer_capacity,
        }
    }

    /// 借出一个空闲缓冲，没有空闲缓冲时阻塞。
    ///
    /// # 契约
    /// - 返回的缓冲一定为空；
    /// - 等待期间 `interrupt` 被置位时返回 [`PoolError::Interrupted`]，中断位随之清除。
    pub fn borrow(&self, interrupt: &InterruptFlag) -> Result<PacketBuffer, PoolError> {
        let mut idle = self.idle.lock();
        loop {
            if let Some(buffer) = idle.pop_front() {
                return Ok(buffer);
            }
            if interrupt.take() {
                return Err(PoolError::Interrupted);
            }
            self.available.wait_for(&mut idle, INTERRUPT_CHECK_INTERVAL);
        }
    }

    /// 非阻塞借出。
    pub fn try_borrow(&self) -> Option<PacketBuffer> {
        self.idle.lock().pop_front()
    }

    /// 归还缓冲并唤醒一个等待者。
    pub fn reclaim(&self, mut buffer: PacketBuffer) -> Result<(), PoolError> {
        if buffer.capacity() != self.buffer_capacity {
            return Err(PoolError::ForeignBuffer {
                expected: self.buffer_capacity,
                found: buffer.capacity(),
            });
        }
        buffer.clear();
        let mut idle = self.idle.lock();
        if idle.len() >= self.size {
            return Err(PoolError::Overfull { size: self.size });
        }
        idle.push_back(buffer);
        drop(idle);
        self.available.notify_one();
        Ok(())
    }

    /// 唤醒全部等待者，使其立即检查中断标志。
    pub fn wake_all(&self) {
        let _guard = self.idle.lock();
        self.available.notify_all();
    }

    /// 构造时确定的缓冲总数。
    pub fn size(&self) -> usize {
        self.size
    }

    /// 单个缓冲的容量。
    pub fn buffer_capacity(&self) -> usize {
        self.buffer_capacity
    }

    /// 当前空闲缓冲数。
    pub fn idle(&self) -> usize {
        self.idle.lock().len()
    }

    /// 当前借出（填充中或传输中）的缓冲数。
    pub fn in_use(&self) -> usize {
        self.size - self.idle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, thread};

    #[test]
    fn borrow_and_reclaim_conserve_buffers() {
        let pool = BufferPool::new(2, 20);
        let flag = InterruptFlag::new();
        let mut first = pool.borrow(&flag).expect("借出失败");
        let _second = pool.borrow(&flag).expect("借出失败");
        assert_eq!(pool.idle(), 0);
        assert_eq!(pool.in_use(), 2);
        assert!(pool.try_borrow().is_none());

        first.try_put(b"a:1|c").expect("写入失败");
        pool.reclaim(first).expect("归还失败");
        let reused = pool.try_borrow().expect("应有空闲缓冲");
        assert!(reused.is_empty(), "归还时游标必须被重置");
        assert_eq!(reused.capacity(), 20);
    }

    #[test]
    fn blocked_borrower_is_released_by_reclaim() {
        let pool = Arc::new(BufferPool::new(1, 8));
        let held = pool.try_borrow().expect("应有空闲缓冲");
        let borrower = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || pool.borrow(&InterruptFlag::new()).map(|b| b.capacity()))
        };
        thread::sleep(Duration::from_millis(20));
        pool.reclaim(held).expect("归还失败");
        assert_eq!(borrower.join().expect("借出线程不应 panic"), Ok(8));
    }

    #[test]
    fn interrupt_aborts_waiting_borrow() {
        let pool = Arc::new(BufferPool::new(1, 8));
        let _held = pool.try_borrow().expect("应有空闲缓冲");
        let flag = Arc::new(InterruptFlag::new());
        let borrower = {
            let pool = Arc::clone(&pool);
            let flag = Arc::clone(&flag);
            thread::spawn(move || pool.borrow(&flag).map(|_| ()))
        };
        thread::sleep(Duration::from_millis(20));
        flag.interrupt();
        pool.wake_all();
        assert_eq!(
            borrower.join().expect("借出线程不应 panic"),
            Err(PoolError::Interrupted)
        );
        assert!(!flag.is_set(), "中断位应被借出方消费");
    }

    #[test]
    fn foreign_buffers_are_rejected() {
        let pool = BufferPool::new(1, 8);
        let err = pool
            .reclaim(PacketBuffer::with_capacity(16))
            .expect_err("容量不符应被拒收");
        assert_eq!(
            err,
            PoolError::ForeignBuffer {
                expected: 8,
                found: 16
            }
        );
    }

    #[test]
    fn reclaim_beyond_size_is_rejected() {
        let pool = BufferPool::new(1, 8);
        let err = pool
            .reclaim(PacketBuffer::with_capacity(8))
            .expect_err("池已满时不应再接收缓冲");
        assert_eq!(err, PoolError::Overfull { size: 1 });
        assert_eq!(pool.idle(), 1);
    }
}
