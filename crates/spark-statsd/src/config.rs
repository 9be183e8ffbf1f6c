//! 处理器配置面。
//!
//! ## 设计目的（Why）
//! - 汇总队列容量、报文上限、缓冲池规模、工作线程数、空闲轮询间隔与刷新策略，
//!   让构造期一次性完成所有校验；
//! - 同时支持代码构建器与 TOML 文本两种来源，便于宿主把配置放进已有的配置文件。
//!
//! ## 契约定义（What）
//! - 所有数量类配置必须大于 0，违例返回 [`ConfigError::Invalid`]；
//! - TOML 中缺省的字段回落到与 DogStatsD 客户端一致的默认值。

use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// 默认队列容量（消息条数）。
pub const DEFAULT_QUEUE_CAPACITY: usize = 4096;
/// 默认单个报文上限，匹配常见以太网 MTU 下的 UDP 安全负载。
pub const DEFAULT_MAX_PACKET_SIZE: usize = 1432;
/// 默认缓冲池规模。
pub const DEFAULT_POOL_SIZE: usize = 512;
/// 默认工作线程数。
pub const DEFAULT_WORKERS: usize = 1;
/// 默认空闲轮询间隔（毫秒）。
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 10;

/// 未写满缓冲何时交给出站通道。
///
/// # 教案式说明
/// - **意图 (Why)**：立即刷新可以把低流量时段的延迟压到最低，但会产生更多小报文；
///   最大延迟策略则用有界延迟换取更高的批量效率；
/// - **契约 (What)**：两种策略下，关闭排空时都会把非空缓冲转发出去，不会丢数据。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FlushPolicy {
    /// 写入后一旦观察到队列为空，立即转发当前缓冲。
    #[default]
    OnEmpty,
    /// 缓冲中首条消息写入后超过给定时长才转发。
    MaxLatency {
        #[serde(rename = "max_latency_ms", with = "millis")]
        max_latency: Duration,
    },
}

impl FlushPolicy {
    /// 以时长构造最大延迟策略。
    pub const fn max_latency(bound: Duration) -> Self {
        Self::MaxLatency { max_latency: bound }
    }
}

/// 打包流水线的完整配置。
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessorConfig {
    /// 准入计数器的软上限。
    pub queue_capacity: usize,
    /// 单个缓冲（即单个数据报）的容量上限，单位字节。
    pub max_packet_size: usize,
    /// 缓冲池中预分配的缓冲数量。
    pub pool_size: usize,
    /// 共享同一队列与缓冲池的工作线程数。
    pub workers: usize,
    /// 出站通道容量；缺省时等于缓冲池规模。
    pub outbound_capacity: Option<usize>,
    /// 队列为空时的轮询间隔。
    #[serde(rename = "poll_interval_ms", with = "millis")]
    pub poll_interval: Duration,
    /// 刷新策略。
    pub flush_policy: FlushPolicy,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            pool_size: DEFAULT_POOL_SIZE,
            workers: DEFAULT_WORKERS,
            outbound_capacity: None,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            flush_policy: FlushPolicy::OnEmpty,
        }
    }
}

impl ProcessorConfig {
    /// 返回以默认值为起点的构建器。
    pub fn builder() -> ProcessorConfigBuilder {
        ProcessorConfigBuilder::default()
    }

    /// 从 TOML 文本解析并校验配置。
    ///
    /// # 契约 (What)
    /// - 未出现的字段使用默认值，未知字段视为解析错误；
    /// - 返回前调用 [`validate`](Self::validate)，调用方拿到的配置一定可直接用于构造处理器。
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// 校验所有取值。
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::invalid("queue_capacity", "must be greater than zero"));
        }
        if self.max_packet_size == 0 {
            return Err(ConfigError::invalid("max_packet_size", "must be greater than zero"));
        }
        if self.pool_size == 0 {
            return Err(ConfigError::invalid("pool_size", "must be greater than zero"));
        }
        if self.workers == 0 {
            return Err(ConfigError::invalid("workers", "must be greater than zero"));
        }
        if self.outbound_capacity == Some(0) {
            return Err(ConfigError::invalid(
                "outbound_capacity",
                "must be greater than zero when set",
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::invalid("poll_interval_ms", "must be greater than zero"));
        }
        if let FlushPolicy::MaxLatency { max_latency } = self.flush_policy
            && max_latency.is_zero()
        {
            return Err(ConfigError::invalid(
                "flush_policy.max_latency_ms",
                "must be greater than zero",
            ));
        }
        Ok(())
    }

    /// 实际生效的出站通道容量。
    pub fn effective_outbound_capacity(&self) -> usize {
        self.outbound_capacity.unwrap_or(self.pool_size)
    }
}

/// [`ProcessorConfig`] 的链式构建器。
#[derive(Clone, Debug, Default)]
pub struct ProcessorConfigBuilder {
    config: ProcessorConfig,
}

impl ProcessorConfigBuilder {
    pub fn queue_capacity(mut self, value: usize) -> Self {
        self.config.queue_capacity = value;
        self
    }

    pub fn max_packet_size(mut self, value: usize) -> Self {
        self.config.max_packet_size = value;
        self
    }

    pub fn pool_size(mut self, value: usize) -> Self {
        self.config.pool_size = value;
        self
    }

    pub fn workers(mut self, value: usize) -> Self {
        self.config.workers = value;
        self
    }

    pub fn outbound_capacity(mut self, value: usize) -> Self {
        self.config.outbound_capacity = Some(value);
        self
    }

    pub fn poll_interval(mut self, value: Duration) -> Self {
        self.config.poll_interval = value;
        self
    }

    pub fn flush_policy(mut self, value: FlushPolicy) -> Self {
        self.config.flush_policy = value;
        self
    }

    /// 校验并产出配置。
    pub fn build(self) -> Result<ProcessorConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_client_constants() {
        let config = ProcessorConfig::default();
        assert_eq!(config.queue_capacity, 4096);
        assert_eq!(config.max_packet_size, 1432);
        assert_eq!(config.pool_size, 512);
        assert_eq!(config.workers, 1);
        assert_eq!(config.poll_interval, Duration::from_millis(10));
        assert_eq!(config.effective_outbound_capacity(), 512);
        config.validate().expect("默认配置必须合法");
    }

    #[test]
    fn toml_overrides_selected_fields() {
        let config = ProcessorConfig::from_toml_str(
            r#"
                queue_capacity = 16
                max_packet_size = 20
                pool_size = 2
                poll_interval_ms = 1

                [flush_policy]
                kind = "max_latency"
                max_latency_ms = 250
            "#,
        )
        .expect("解析配置失败");

        assert_eq!(config.queue_capacity, 16);
        assert_eq!(config.max_packet_size, 20);
        assert_eq!(config.pool_size, 2);
        assert_eq!(config.workers, DEFAULT_WORKERS);
        assert_eq!(config.poll_interval, Duration::from_millis(1));
        assert_eq!(
            config.flush_policy,
            FlushPolicy::max_latency(Duration::from_millis(250))
        );
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = ProcessorConfig::from_toml_str("queue_size = 3").expect_err("未知字段应失败");
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn zero_values_fail_validation() {
        let err = ProcessorConfig::builder()
            .pool_size(0)
            .build()
            .expect_err("零缓冲池应被拒绝");
        assert!(matches!(err, ConfigError::Invalid { field: "pool_size", .. }));

        let err = ProcessorConfig::builder()
            .flush_policy(FlushPolicy::max_latency(Duration::ZERO))
            .build()
            .expect_err("零延迟上限应被拒绝");
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "flush_policy.max_latency_ms",
                ..
            }
        ));
    }
}
