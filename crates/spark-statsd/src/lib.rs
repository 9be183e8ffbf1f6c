//! `spark-statsd` 提供指标客户端的非阻塞打包流水线。
//!
//! # 模块定位（Why）
//! - 指标上报位于业务热路径上，`send` 不能阻塞、不能加锁，也不能把网络故障回溯给调用方；
//! - 单条 UDP 报文容纳多条以换行分隔的指标可以显著降低系统调用与报文数量。
//!
//! # 设计概要（How）
//! - `queue`：无锁队列加准入计数器，达到容量即拒绝新消息；
//! - `pool`：启动时预分配固定数量、固定容量的 [`PacketBuffer`]，运行期不再分配；
//! - `worker`：工作线程把消息序列化后装入缓冲，放不下时转发旧缓冲并借用新缓冲；
//! - `outbound` / `transport`：有界通道把写好的报文交给独立的发送线程，发送后缓冲归还到池；
//! - `processor`：对外门面，负责启动、准入、关闭、等待排空与中断。
//!
//! # 契约（What）
//! - 关闭前已准入的消息要么出现在某个报文中，要么作为超长或序列化故障上报；
//! - 任何报文都不会超过配置的 `max_packet_size`，也不会把一条消息拆到两个报文里；
//! - 运行期条件（超长、序列化故障、出站断开、发送失败）交给 [`ErrorHandler`]，不会终止流水线。

mod buffer;
mod config;
mod error;
mod message;
mod outbound;
mod pool;
mod processor;
mod queue;
mod signal;
mod stats;
mod transport;
mod worker;

pub use buffer::{Overflow, PacketBuffer, SEPARATOR};
pub use config::{
    DEFAULT_MAX_PACKET_SIZE, DEFAULT_POLL_INTERVAL_MS, DEFAULT_POOL_SIZE, DEFAULT_QUEUE_CAPACITY,
    DEFAULT_WORKERS, FlushPolicy, ProcessorConfig, ProcessorConfigBuilder,
};
pub use error::{
    ConfigError, ErrorHandler, LoggingErrorHandler, PoolError, ProcessorError, SendError,
};
pub use message::Message;
pub use outbound::{ForwardError, Inbound, Outbound, handoff};
pub use pool::BufferPool;
pub use processor::Processor;
pub use queue::MessageQueue;
pub use signal::{EndSignal, InterruptFlag};
pub use stats::ProcessorStats;
pub use transport::{Sender, Transport, UdpTransport};
pub use worker::WorkerState;
