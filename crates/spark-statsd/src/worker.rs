//! 打包工作线程：排空消息队列、序列化消息并把它们装入报文缓冲。
//!
//! # 教案式说明
//!
//! ## 意图 (Why)
//! - 生产者只负责入队，序列化与打包全部推迟到这里执行，保证 `send` 廉价且不阻塞；
//! - 一条消息的字节要么完整地落在一个报文里，要么整体挪到下一个报文，绝不跨报文拆分。
//!
//! ## 逻辑 (How)
//! - 状态机 `Running → Draining → Stopped`：关闭标志置位后继续处理剩余消息，
//!   直到“队列为空且已关闭”才退出，退出时恰好倒数一次结束闩锁；
//! - 单条消息的处理步骤：清空暂存字符串并序列化 → 检查是否超过空缓冲容量 →
//!   剩余空间不足 `长度 + 1` 时先转发当前缓冲 → 标记游标后写分隔符与正文 →
//!   溢出则回退、转发并在全新缓冲上重试一次 → 按刷新策略决定是否立即转发；
//! - 缓冲按需借出：转发之后直到下一条消息需要写入时才借新缓冲，空闲的工作线程不占用池。
//!
//! ## 契约 (What)
//! - 运行期条件一律交给 [`ErrorHandler`]，只有全新缓冲上的二次溢出会终止线程；
//! - 阻塞点只有两处：缓冲池借出与出站转发。两处被中断时，若关闭标志已置位则归还缓冲并退出，
//!   否则视为伪中断继续重试。

use std::{
    any::Any,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU8, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use tracing::{debug, trace};

use crate::{
    buffer::{Overflow, PacketBuffer},
    config::FlushPolicy,
    error::{ErrorHandler, ProcessorError},
    message::Message,
    outbound::{ForwardError, Outbound},
    pool::BufferPool,
    queue::MessageQueue,
    signal::{EndSignal, InterruptFlag},
    stats::ProcessorMetrics,
};

/// 工作线程所处的生命周期阶段。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    /// 正常轮询队列。
    Running = 0,
    /// 已观察到关闭标志，正在排空剩余消息。
    Draining = 1,
    /// 循环已退出，结束闩锁已倒数。
    Stopped = 2,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Running,
            1 => Self::Draining,
            _ => Self::Stopped,
        }
    }
}

/// 单个工作线程对外可见的状态：生命周期阶段与中断位。
#[derive(Debug)]
pub(crate) struct WorkerStatus {
    state: AtomicU8,
    pub(crate) interrupt: InterruptFlag,
}

impl WorkerStatus {
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU8::new(WorkerState::Running as u8),
            interrupt: InterruptFlag::new(),
        }
    }

    pub(crate) fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set(&self, state: WorkerState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

/// 生产者与全部工作线程共享的流水线状态。
pub(crate) struct Shared<M> {
    pub(crate) queue: MessageQueue<M>,
    pub(crate) pool: Arc<BufferPool>,
    pub(crate) shutdown: AtomicBool,
    pub(crate) end: EndSignal,
    pub(crate) handler: Arc<dyn ErrorHandler>,
    pub(crate) metrics: ProcessorMetrics,
    pub(crate) poll_interval: Duration,
    pub(crate) flush_policy: FlushPolicy,
}

impl<M> Shared<M> {
    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    fn report(&self, error: ProcessorError) {
        self.handler.handle(&error);
    }
}

/// 循环退出的原因。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WorkerExit {
    /// 队列为空且已关闭。
    Drained,
    /// 关闭期间阻塞点被中断。
    Interrupted,
    /// 内部缺陷。
    Defect,
}

/// 单个打包工作线程。
pub(crate) struct PackingWorker<M> {
    id: usize,
    shared: Arc<Shared<M>>,
    outbound: Outbound,
    status: Arc<WorkerStatus>,
    scratch: String,
    current: Option<PacketBuffer>,
    batch_started: Option<Instant>,
}

impl<M: Message> PackingWorker<M> {
    pub(crate) fn new(
        id: usize,
        shared: Arc<Shared<M>>,
        outbound: Outbound,
        status: Arc<WorkerStatus>,
    ) -> Self {
        let scratch = String::with_capacity(shared.pool.buffer_capacity());
        Self {
            id,
            shared,
            outbound,
            status,
            scratch,
            current: None,
            batch_started: None,
        }
    }

    /// 线程入口：运行主循环，收尾后倒数结束闩锁。
    pub(crate) fn run(mut self) {
        debug!(worker = self.id, "statsd packing worker started");
        let exit = self.run_loop();
        self.finish(exit);
    }

    fn run_loop(&mut self) -> WorkerExit {
        loop {
            // 先读关闭标志再出队：关闭前已准入的消息一定能被这次出队看到。
            let shutdown = self.shared.is_shutdown();
            let Some(message) = self.shared.queue.poll() else {
                if shutdown {
                    return WorkerExit::Drained;
                }
                if let Err(exit) = self.flush_idle() {
                    return exit;
                }
                thread::sleep(self.shared.poll_interval);
                continue;
            };
            if shutdown && self.status.state() == WorkerState::Running {
                debug!(worker = self.id, "statsd packing worker draining");
                self.status.set(WorkerState::Draining);
            }
            if let Err(exit) = self.pack(message) {
                return exit;
            }
        }
    }

    /// 处理一条出队消息。
    fn pack(&mut self, message: M) -> Result<(), WorkerExit> {
        self.scratch.clear();
        self.scratch.reserve(message.lower_bound_size());
        let serialized =
            panic::catch_unwind(AssertUnwindSafe(|| message.write_to(&mut self.scratch)));
        match serialized {
            Ok(Ok(())) => {}
            Ok(Err(fmt::Error)) => {
                self.shared.metrics.on_fault();
                self.shared.report(ProcessorError::Serialization {
                    detail: "formatter returned an error".to_owned(),
                });
                return Ok(());
            }
            Err(payload) => {
                self.shared.metrics.on_fault();
                self.shared.report(ProcessorError::Serialization {
                    detail: panic_detail(payload.as_ref()),
                });
                return Ok(());
            }
        }

        let size = self.scratch.len();
        if size == 0 {
            // 空消息不产生任何字节，也不应留下孤立的分隔符。
            return Ok(());
        }
        let capacity = self.shared.pool.buffer_capacity();
        if size > capacity {
            self.shared.metrics.on_too_long();
            self.shared.report(ProcessorError::MessageTooLong {
                size,
                capacity,
                message: self.scratch.clone(),
            });
            return Ok(());
        }

        let mut buffer = match self.current.take() {
            // 非空缓冲还需为分隔符留出 1 字节。
            Some(buffer) if buffer.is_empty() || buffer.remaining() > size => buffer,
            Some(full) => {
                self.batch_started = None;
                self.forward(full)?;
                self.borrow()?
            }
            None => self.borrow()?,
        };

        // `size` 是精确字节数，上面的空间检查通过后不应溢出；此分支只兜底 `append` 自身的缺陷。
        if append(&mut buffer, self.scratch.as_bytes()).is_err() {
            if buffer.is_empty() {
                return Err(self.defect(buffer, size));
            }
            self.batch_started = None;
            self.forward(buffer)?;
            buffer = self.borrow()?;
            if append(&mut buffer, self.scratch.as_bytes()).is_err() {
                return Err(self.defect(buffer, size));
            }
        }
        self.shared.metrics.on_packed();

        // 缓冲里只有本条消息时，批次从此刻起算。
        if buffer.len() == size {
            self.batch_started = Some(Instant::now());
        }

        let flush_now = match self.shared.flush_policy {
            FlushPolicy::OnEmpty => self.shared.queue.is_empty(),
            FlushPolicy::MaxLatency { max_latency } => self
                .batch_started
                .is_some_and(|started| started.elapsed() >= max_latency),
        };
        if flush_now {
            self.batch_started = None;
            self.forward(buffer)
        } else {
            self.current = Some(buffer);
            Ok(())
        }
    }

    /// 队列为空时按刷新策略处理未写满的缓冲。
    ///
    /// 多个工作线程共享队列时，本线程写入后观察到的“非空”可能被其它线程抢先消费，
    /// 因此 `OnEmpty` 策略在空闲路径上同样需要刷新。
    fn flush_idle(&mut self) -> Result<(), WorkerExit> {
        let due = match self.shared.flush_policy {
            FlushPolicy::OnEmpty => true,
            FlushPolicy::MaxLatency { max_latency } => self
                .batch_started
                .is_some_and(|started| started.elapsed() >= max_latency),
        };
        if !due {
            return Ok(());
        }
        match self.current.take() {
            Some(buffer) if !buffer.is_empty() => {
                self.batch_started = None;
                self.forward(buffer)
            }
            other => {
                self.current = other;
                Ok(())
            }
        }
    }

    /// 将缓冲交给出站通道，伪中断时重试。
    fn forward(&self, buffer: PacketBuffer) -> Result<(), WorkerExit> {
        let bytes = buffer.len();
        let mut pending = buffer;
        loop {
            match self.outbound.forward(pending, &self.status.interrupt) {
                Ok(()) => {
                    self.shared.metrics.on_forwarded(bytes);
                    trace!(worker = self.id, bytes, "statsd packet forwarded");
                    return Ok(());
                }
                Err(ForwardError::Interrupted(returned)) => {
                    if self.shared.is_shutdown() {
                        self.shared.metrics.on_packet_dropped();
                        self.reclaim(returned);
                        return Err(WorkerExit::Interrupted);
                    }
                    pending = returned;
                }
                Err(ForwardError::Disconnected(returned)) => {
                    self.shared.metrics.on_packet_dropped();
                    self.shared.report(ProcessorError::OutboundClosed { bytes });
                    self.reclaim(returned);
                    return Ok(());
                }
            }
        }
    }

    /// 借出新缓冲，伪中断时重试。
    fn borrow(&self) -> Result<PacketBuffer, WorkerExit> {
        loop {
            match self.shared.pool.borrow(&self.status.interrupt) {
                Ok(buffer) => return Ok(buffer),
                Err(_) if self.shared.is_shutdown() => return Err(WorkerExit::Interrupted),
                Err(_) => continue,
            }
        }
    }

    fn reclaim(&self, buffer: PacketBuffer) {
        if let Err(err) = self.shared.pool.reclaim(buffer) {
            self.shared.report(ProcessorError::Internal {
                detail: err.to_string(),
            });
        }
    }

    /// 全新缓冲仍然溢出：上报致命缺陷并归还缓冲。
    fn defect(&self, buffer: PacketBuffer, size: usize) -> WorkerExit {
        self.shared.report(ProcessorError::Internal {
            detail: format!(
                "message of {size} bytes overflowed an empty buffer of {} bytes",
                buffer.capacity()
            ),
        });
        self.reclaim(buffer);
        WorkerExit::Defect
    }

    fn finish(mut self, exit: WorkerExit) {
        if let Some(buffer) = self.current.take() {
            if exit == WorkerExit::Drained && !buffer.is_empty() {
                // 排空时把最后一个未满缓冲发出去；被中断时 forward 已自行归还。
                let _ = self.forward(buffer);
            } else {
                if !buffer.is_empty() {
                    self.shared.metrics.on_packet_dropped();
                }
                self.reclaim(buffer);
            }
        }
        self.scratch = String::new();
        self.status.set(WorkerState::Stopped);
        debug!(worker = self.id, ?exit, "statsd packing worker stopped");
        self.shared.end.count_down();
    }
}

/// 标记游标后写入分隔符与正文；任何一步溢出都回退到标记位置。
fn append(buffer: &mut PacketBuffer, line: &[u8]) -> Result<(), Overflow> {
    buffer.mark();
    let written = if buffer.is_empty() {
        buffer.try_put(line)
    } else {
        buffer.put_separator().and_then(|()| buffer.try_put(line))
    };
    if written.is_err() {
        buffer.reset();
    }
    written
}

fn panic_detail(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        format!("message panicked during serialization: {text}")
    } else if let Some(text) = payload.downcast_ref::<String>() {
        format!("message panicked during serialization: {text}")
    } else {
        "message panicked during serialization".to_owned()
    }
}
