use std::{
    fmt, io,
    sync::{Arc, atomic::Ordering},
    thread::{self, JoinHandle},
    time::Duration,
};

use tracing::{debug, info};

use crate::{
    config::ProcessorConfig,
    error::{ConfigError, ErrorHandler, LoggingErrorHandler, ProcessorError, SendError},
    message::Message,
    outbound::{Inbound, handoff},
    pool::BufferPool,
    queue::MessageQueue,
    signal::EndSignal,
    stats::{ProcessorMetrics, ProcessorStats},
    worker::{PackingWorker, Shared, WorkerState, WorkerStatus},
};

/// `Drop` 在强制中断前等待排空的时长。
const DROP_GRACE_PERIOD: Duration = Duration::from_secs(1);

struct WorkerHandle {
    status: Arc<WorkerStatus>,
    thread: Option<JoinHandle<()>>,
}

/// 非阻塞打包处理器的门面。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 对生产者只暴露 `send`：准入检查 O(1)、不加锁、不阻塞，被拒绝时返回 `false` 由调用方计数；
/// - 对宿主暴露生命周期控制：`shutdown` 只置位不等待，需要静默保证时再调用
///   [`await_termination`](Self::await_termination)。
///
/// ## 逻辑 (How)
/// - 构造时预分配缓冲池、创建出站通道，并为每个工作线程创建独立的 [`PackingWorker`]；
/// - 每个工作线程持有一份出站发送端，全部退出后通道断开，传输线程据此收尾；
/// - 结束闩锁的初始计数等于工作线程数，每个线程退出时倒数一次。
///
/// ## 契约 (What)
/// - `new`：配置非法或线程创建失败时返回 [`ConfigError`]，这是唯一穿透到调用方的错误；
/// - `send`：已关闭或准入计数达到容量时返回 `false`，消息被丢弃；
/// - `shutdown`：幂等；关闭前已准入的消息都会被打包转发或上报为超长；
/// - `interrupt`：置位每个工作线程的中断位，仅在已关闭时才会让阻塞中的线程提前退出；
/// - `Drop`：关闭并等待排空，超过宽限期后中断，随后回收全部线程。
///
/// ## 注意事项 (Trade-offs)
/// - 出站通道由传输协作方消费；若无人消费又不释放 [`Inbound`]，排空会阻塞到被中断为止。
pub struct Processor<M: Message> {
    shared: Arc<Shared<M>>,
    workers: Vec<WorkerHandle>,
    config: ProcessorConfig,
}

impl<M: Message> Processor<M> {
    /// 按配置启动处理器，运行期条件交给 `handler`。
    ///
    /// 返回的 [`Inbound`] 应交给传输协作方；缓冲发送完毕后经
    /// [`pool`](Self::pool) 归还。
    pub fn new(
        config: ProcessorConfig,
        handler: impl ErrorHandler,
    ) -> Result<(Self, Inbound), ConfigError> {
        Self::start(config, handler, |name, worker| {
            thread::Builder::new().name(name).spawn(move || worker.run())
        })
    }

    /// 以给定的线程创建方式启动处理器。
    fn start<S>(
        config: ProcessorConfig,
        handler: impl ErrorHandler,
        mut spawn: S,
    ) -> Result<(Self, Inbound), ConfigError>
    where
        S: FnMut(String, PackingWorker<M>) -> io::Result<JoinHandle<()>>,
    {
        config.validate()?;

        let shared = Arc::new(Shared {
            queue: MessageQueue::new(config.queue_capacity),
            pool: Arc::new(BufferPool::new(config.pool_size, config.max_packet_size)),
            shutdown: Default::default(),
            end: EndSignal::new(config.workers),
            handler: Arc::new(handler),
            metrics: ProcessorMetrics::default(),
            poll_interval: config.poll_interval,
            flush_policy: config.flush_policy,
        });
        let (outbound, inbound) =
            handoff(config.effective_outbound_capacity(), config.poll_interval);

        let mut processor = Self {
            shared,
            workers: Vec::with_capacity(config.workers),
            config,
        };
        for id in 0..processor.config.workers {
            let status = Arc::new(WorkerStatus::new());
            let worker = PackingWorker::new(
                id,
                Arc::clone(&processor.shared),
                outbound.clone(),
                Arc::clone(&status),
            );
            let name = format!("spark-statsd-worker-{id}");
            match spawn(name.clone(), worker) {
                Ok(thread) => processor.workers.push(WorkerHandle {
                    status,
                    thread: Some(thread),
                }),
                Err(source) => {
                    // 未启动的线程永远不会倒数，先替它们倒数，析构时只等待已启动的线程。
                    for _ in id..processor.config.workers {
                        processor.shared.end.count_down();
                    }
                    return Err(ConfigError::Spawn { name, source });
                }
            }
        }

        info!(
            workers = processor.config.workers,
            pool_size = processor.config.pool_size,
            max_packet_size = processor.config.max_packet_size,
            queue_capacity = processor.config.queue_capacity,
            "statsd processor started"
        );
        Ok((processor, inbound))
    }

    /// 使用 [`LoggingErrorHandler`] 启动处理器。
    pub fn with_logging_handler(config: ProcessorConfig) -> Result<(Self, Inbound), ConfigError> {
        Self::new(config, LoggingErrorHandler)
    }

    /// 提交一条消息；被接纳时返回 `true`。
    ///
    /// 与 [`shutdown`](Self::shutdown) 并发时，消息可能在全部工作线程退出之后才入队。
    /// 这类消息不会被打包，由 [`shutdown_and_join`](Self::shutdown_and_join) 清点并以
    /// [`ProcessorError::Abandoned`](crate::ProcessorError::Abandoned) 上报。
    pub fn send(&self, message: M) -> bool {
        self.try_send(message).is_ok()
    }

    /// 提交一条消息，被拒绝时退回消息与原因。
    pub fn try_send(&self, message: M) -> Result<(), SendError<M>> {
        if self.shared.is_shutdown() {
            self.shared.metrics.on_rejected_shutdown();
            return Err(SendError::Shutdown(message));
        }
        match self.shared.queue.offer(message) {
            Ok(()) => {
                self.shared.metrics.on_admitted();
                Ok(())
            }
            Err(message) => {
                self.shared.metrics.on_rejected_full();
                Err(SendError::Full(message))
            }
        }
    }

    /// 置位关闭标志后立即返回，重复调用无额外效果。
    pub fn shutdown(&self) {
        if !self.shared.shutdown.swap(true, Ordering::AcqRel) {
            debug!(pending = self.shared.queue.approx_len(), "statsd processor shutting down");
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.is_shutdown()
    }

    /// 等待全部工作线程退出，期限内完成返回 `true`。
    pub fn await_termination(&self, timeout: Duration) -> bool {
        self.shared.end.wait_timeout(timeout)
    }

    /// 中断全部工作线程的阻塞等待。
    pub fn interrupt(&self) {
        for worker in &self.workers {
            worker.status.interrupt.interrupt();
        }
        self.shared.pool.wake_all();
    }

    /// 关闭、等待排空，超时后中断，最后回收全部线程；按期排空时返回 `true`。
    ///
    /// 线程回收后仍留在队列中的消息（被中断的排空，或与关闭竞争入队的消息）
    /// 会被丢弃，并以一次 [`ProcessorError::Abandoned`](crate::ProcessorError::Abandoned) 上报。
    pub fn shutdown_and_join(&mut self, timeout: Duration) -> bool {
        self.shutdown();
        let drained = self.await_termination(timeout);
        if !drained {
            self.interrupt();
        }
        self.join_workers();
        self.sweep_abandoned();
        drained
    }

    /// 缓冲池；传输协作方通过它归还已发送的缓冲。
    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.shared.pool
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// 准入计数器的当前读数。
    pub fn queue_len(&self) -> usize {
        self.shared.queue.approx_len()
    }

    pub fn stats(&self) -> ProcessorStats {
        self.shared.metrics.snapshot()
    }

    /// 每个工作线程当前的生命周期阶段。
    pub fn worker_states(&self) -> Vec<WorkerState> {
        self.workers
            .iter()
            .map(|worker| worker.status.state())
            .collect()
    }

    /// 独占借用保证此时没有并发的 `send`，清点结果是完整的。
    fn sweep_abandoned(&mut self) {
        let mut count = 0;
        while self.shared.queue.poll().is_some() {
            count += 1;
        }
        if count > 0 {
            self.shared.metrics.on_abandoned(count);
            self.shared.handler.handle(&ProcessorError::Abandoned { count });
        }
    }

    fn join_workers(&mut self) {
        for worker in &mut self.workers {
            if let Some(thread) = worker.thread.take()
                && thread.join().is_err()
            {
                tracing::error!("statsd packing worker panicked");
            }
        }
    }
}

impl<M: Message> Drop for Processor<M> {
    fn drop(&mut self) {
        self.shutdown_and_join(DROP_GRACE_PERIOD);
    }
}

impl<M: Message> fmt::Debug for Processor<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Processor")
            .field("config", &self.config)
            .field("shutdown", &self.is_shutdown())
            .field("queue_len", &self.queue_len())
            .finish_non_exhaustive()
    }
}
