//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 集中定义打包流水线在构造期、工作线程内部与缓冲池上的全部失败语义；
//! - 生产者只会看到 `send` 返回的布尔值，其余故障均经由 [`ErrorHandler`] 旁路上报，
//!   因此错误类型本身需要携带足够的排障上下文。
//!
//! ## 分类约定（What）
//! - [`ConfigError`]：构造期错误，唯一允许穿透到调用方的失败路径；
//! - [`ProcessorError`]：工作线程或发送线程在运行期报告的条件，永不跨越生产者边界；
//! - [`PoolError`]：缓冲池租借/归还协议上的异常。

use std::{fmt, io, sync::Arc};

use thiserror::Error;

/// 构造期错误。
///
/// # 教案式说明
/// - **意图 (Why)**：配置非法或线程无法创建时，处理器根本无法进入运行态，必须同步告知调用方；
/// - **契约 (What)**：仅由 [`ProcessorConfig::validate`](crate::ProcessorConfig::validate)、
///   TOML 解析与 [`Processor::new`](crate::Processor::new) 产生。
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 某个配置项取值越界。
    #[error("invalid configuration `{field}`: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },

    /// TOML 文本无法解析为 [`ProcessorConfig`](crate::ProcessorConfig)。
    #[error("failed to parse processor configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// 工作线程创建失败。
    #[error("failed to spawn `{name}` thread: {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },
}

impl ConfigError {
    pub(crate) const fn invalid(field: &'static str, reason: &'static str) -> Self {
        Self::Invalid { field, reason }
    }
}

/// 运行期由工作线程或发送线程报告的条件。
///
/// # 教案式说明
/// - **意图 (Why)**：将“报文过长”“序列化故障”“出站通道关闭”等条件统一成一个可匹配的枚举，
///   让错误回调可以按类别计数或告警；
/// - **契约 (What)**：
///   - 所有变体均满足 `Send + Sync + 'static`，可在线程之间传递；
///   - 除 [`ProcessorError::Internal`] 外，任何变体都不会终止工作线程；
/// - **设计权衡 (Trade-offs)**：`MessageTooLong` 携带完整序列化文本，便于定位超长指标，
///   代价是一次额外分配，仅发生在异常路径上。
#[derive(Clone, Debug, Error)]
pub enum ProcessorError {
    /// 单条消息序列化后超过了空缓冲的容量，永远无法装入任何报文。
    #[error("message too long: {size} bytes exceed packet capacity of {capacity} bytes")]
    MessageTooLong {
        size: usize,
        capacity: usize,
        message: String,
    },

    /// 序列化过程中出现的意外故障（`fmt::Error` 或被捕获的 panic）。
    #[error("failed to serialize message: {detail}")]
    Serialization { detail: String },

    /// 出站通道的接收端已经全部释放，已打包的报文被丢弃。
    #[error("outbound handoff is disconnected, dropped packet of {bytes} bytes")]
    OutboundClosed { bytes: usize },

    /// 工作线程全部退出后仍留在队列中的消息，已被丢弃。
    #[error("{count} admitted messages were abandoned after the workers stopped")]
    Abandoned { count: usize },

    /// 传输协作方发送报文失败。
    #[error("transport failed to send packet: {0}")]
    Transport(#[source] Arc<io::Error>),

    /// 不应出现的内部缺陷，例如全新缓冲上的二次溢出；会终止当前工作线程。
    #[error("internal packing defect: {detail}")]
    Internal { detail: String },
}

impl ProcessorError {
    /// 稳定的错误码，供回调侧做指标打点。
    pub fn code(&self) -> &'static str {
        match self {
            Self::MessageTooLong { .. } => "statsd.message.too_long",
            Self::Serialization { .. } => "statsd.message.serialization",
            Self::OutboundClosed { .. } => "statsd.outbound.closed",
            Self::Abandoned { .. } => "statsd.message.abandoned",
            Self::Transport(_) => "statsd.transport.send",
            Self::Internal { .. } => "statsd.internal",
        }
    }

    /// 是否意味着工作线程将随之退出。
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }
}

impl From<io::Error> for ProcessorError {
    fn from(value: io::Error) -> Self {
        Self::Transport(Arc::new(value))
    }
}

/// `try_send` 拒绝时退回的消息及原因。
///
/// 准入拒绝不是故障：调用方拿回消息后自行决定计数、重试或丢弃。
#[derive(Error)]
pub enum SendError<M> {
    /// 准入计数已达到队列容量。
    #[error("statsd message queue is full")]
    Full(M),
    /// 处理器已关闭。
    #[error("statsd processor is shut down")]
    Shutdown(M),
}

impl<M> SendError<M> {
    /// 取回被拒绝的消息。
    pub fn into_inner(self) -> M {
        match self {
            Self::Full(message) | Self::Shutdown(message) => message,
        }
    }
}

// 手写 `Debug`，不要求消息类型实现 `Debug`。
impl<M> fmt::Debug for SendError<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full(_) => f.write_str("Full(..)"),
            Self::Shutdown(_) => f.write_str("Shutdown(..)"),
        }
    }
}

/// 缓冲池协议错误。
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    /// 等待空闲缓冲期间，调用方的中断标志被置位。
    #[error("interrupted while waiting for an idle buffer")]
    Interrupted,

    /// 归还的缓冲容量与池不一致，拒绝接收以维持总量守恒。
    #[error("buffer of capacity {found} does not belong to a pool of capacity {expected}")]
    ForeignBuffer { expected: usize, found: usize },

    /// 空闲集合已满，说明归还了并非借自本池的缓冲。
    #[error("pool of {size} buffers is already full")]
    Overfull { size: usize },
}

/// 运行期条件的注入式回调。
///
/// # 教案式说明
/// - **意图 (Why)**：工作线程绝不向外抛出错误，所有条件都经由该回调观测；
/// - **契约 (What)**：实现必须线程安全且不得 panic，回调在工作线程上同步执行，
///   耗时操作会直接拉长打包延迟；
/// - **使用方式 (How)**：任何 `Fn(&ProcessorError) + Send + Sync` 闭包都自动实现该 trait。
pub trait ErrorHandler: Send + Sync + 'static {
    /// 处理一次上报。
    fn handle(&self, error: &ProcessorError);
}

impl<F> ErrorHandler for F
where
    F: Fn(&ProcessorError) + Send + Sync + 'static,
{
    fn handle(&self, error: &ProcessorError) {
        self(error)
    }
}

/// 默认回调：通过 `tracing` 记录告警，不做其它处理。
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingErrorHandler;

impl ErrorHandler for LoggingErrorHandler {
    fn handle(&self, error: &ProcessorError) {
        tracing::warn!(code = error.code(), fatal = error.is_fatal(), "{error}");
    }
}
