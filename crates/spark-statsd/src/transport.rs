//! 传输协作方：从出站通道取出报文、发送，并把缓冲归还到池。
//!
//! ## 设计动机（Why）
//! - 打包流水线只负责生产报文，真正的网络发送由独立线程完成，
//!   使网络抖动只会阻塞出站通道，而不会回溯到生产者；
//! - 以 [`Transport`] trait 隔离具体套接字，便于替换为 UDS、TCP 或测试桩。
//!
//! ## 契约（What）
//! - 每个取出的缓冲无论发送成功与否都会归还到池，发送失败经 [`ErrorHandler`] 上报；
//! - 报文内容为换行分隔的若干条消息，没有结尾分隔符，边界即缓冲的写游标；
//! - 出站通道断开且排空后，发送线程退出。

use std::{
    io,
    net::{ToSocketAddrs, UdpSocket},
    sync::Arc,
    thread::{self, JoinHandle},
};

use tracing::{debug, trace};

use crate::{
    error::{ConfigError, ErrorHandler, ProcessorError},
    outbound::Inbound,
    pool::BufferPool,
};

/// 报文的最终去向。
pub trait Transport: Send + 'static {
    /// 发送一个完整报文，返回实际写出的字节数。
    fn send(&mut self, packet: &[u8]) -> io::Result<usize>;
}

/// 基于已连接 UDP 套接字的传输实现。
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    /// 绑定本地临时端口并连接到 `target`。
    pub fn connect(target: impl ToSocketAddrs) -> io::Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", 0))?;
        socket.connect(target)?;
        Ok(Self { socket })
    }

    /// 包装一个已经连接好的套接字。
    pub fn from_socket(socket: UdpSocket) -> Self {
        Self { socket }
    }

    pub fn socket(&self) -> &UdpSocket {
        &self.socket
    }
}

impl Transport for UdpTransport {
    fn send(&mut self, packet: &[u8]) -> io::Result<usize> {
        self.socket.send(packet)
    }
}

/// 运行在独立线程上的发送循环。
#[derive(Debug)]
pub struct Sender {
    thread: Option<JoinHandle<()>>,
}

impl Sender {
    /// 启动发送线程。
    pub fn spawn<T: Transport>(
        inbound: Inbound,
        pool: Arc<BufferPool>,
        mut transport: T,
        handler: impl ErrorHandler,
    ) -> Result<Self, ConfigError> {
        let name = "spark-statsd-sender".to_owned();
        let thread = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                debug!("statsd sender started");
                while let Some(packet) = inbound.recv() {
                    match transport.send(packet.as_bytes()) {
                        Ok(sent) => trace!(sent, "statsd packet sent"),
                        Err(err) => handler.handle(&ProcessorError::from(err)),
                    }
                    if let Err(err) = pool.reclaim(packet) {
                        handler.handle(&ProcessorError::Internal {
                            detail: err.to_string(),
                        });
                    }
                }
                debug!("statsd sender stopped");
            })
            .map_err(|source| ConfigError::Spawn { name, source })?;
        Ok(Self {
            thread: Some(thread),
        })
    }

    /// 等待发送线程在出站通道断开后退出。
    pub fn join(mut self) -> thread::Result<()> {
        match self.thread.take() {
            Some(thread) => thread.join(),
            None => Ok(()),
        }
    }
}
