use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_queue::SegQueue;

/// 带近似准入计数的无锁消息队列。
///
/// # 教案式说明
/// - **意图 (Why)**：生产者线程数量不受控，入队必须是 O(1) 且不持锁；
///   真实存储无上限，容量只通过计数器做软门限；
/// - **逻辑 (How)**：`SegQueue` 负责多生产者多消费者存取，`AtomicUsize` 记录近似长度，
///   `offer` 先读计数、自增后再入队，`poll` 出队后自减；
/// - **契约 (What)**：
///   - 计数器在并发入队/出队时可能短暂偏离真实长度，但最终收敛；
///   - 超发上界为 `capacity + 并发竞争检查的生产者数 - 1`，检查与自增之间不加锁；
///   - 不保证跨生产者的全局 FIFO。
#[derive(Debug)]
pub struct MessageQueue<M> {
    messages: SegQueue<M>,
    admitted: AtomicUsize,
    capacity: usize,
}

impl<M> MessageQueue<M> {
    pub fn new(capacity: usize) -> Self {
        Self {
            messages: SegQueue::new(),
            admitted: AtomicUsize::new(0),
            capacity,
        }
    }

    /// 计数器低于容量时入队，否则把消息原样退回。
    pub fn offer(&self, message: M) -> Result<(), M> {
        if self.admitted.load(Ordering::Relaxed) >= self.capacity {
            return Err(message);
        }
        // 自增先于入队：任何出队看到的消息，其自增都已生效，递减不会下溢。
        self.admitted.fetch_add(1, Ordering::Relaxed);
        self.messages.push(message);
        Ok(())
    }

    /// 取出一条消息并递减计数。
    pub fn poll(&self) -> Option<M> {
        let message = self.messages.pop()?;
        self.admitted.fetch_sub(1, Ordering::Relaxed);
        Some(message)
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// 准入计数器的当前读数。
    pub fn approx_len(&self) -> usize {
        self.admitted.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
