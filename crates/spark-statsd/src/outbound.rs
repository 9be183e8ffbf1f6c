//! 工作线程与传输协作方之间的有界出站通道。
//!
//! ## 设计动机（Why）
//! - 通道满时阻塞的是工作线程而不是生产者：背压在此处停留，不会回溯到 `send`；
//! - 阻塞期间需要能够感知中断，因此发送以轮询间隔为粒度分段等待。
//!
//! ## 契约（What）
//! - [`Outbound::forward`] 成功即转移缓冲所有权；失败时缓冲随错误一并退回，调用方负责归还到池；
//! - [`Inbound`] 在全部 [`Outbound`] 释放且通道排空后返回断开，传输线程据此退出。

use std::time::Duration;

use crossbeam_channel::{
    Receiver, RecvTimeoutError, SendTimeoutError, Sender, TryRecvError, bounded,
};

use crate::{buffer::PacketBuffer, signal::InterruptFlag};

/// 创建容量为 `capacity` 的出站通道。
pub fn handoff(capacity: usize, poll_interval: Duration) -> (Outbound, Inbound) {
    let (tx, rx) = bounded(capacity);
    (Outbound { tx, poll_interval }, Inbound { rx })
}

/// 转发失败的原因，携带未送出的缓冲。
#[derive(Debug)]
pub enum ForwardError {
    /// 等待通道空位时中断位被置位。
    Interrupted(PacketBuffer),
    /// 接收端已全部释放。
    Disconnected(PacketBuffer),
}

impl ForwardError {
    /// 取回未送出的缓冲。
    pub fn into_buffer(self) -> PacketBuffer {
        match self {
            Self::Interrupted(buffer) | Self::Disconnected(buffer) => buffer,
        }
    }
}

/// 出站通道的发送端，由工作线程持有。
#[derive(Clone, Debug)]
pub struct Outbound {
    tx: Sender<PacketBuffer>,
    poll_interval: Duration,
}

impl Outbound {
    /// 将写满（或需要立即刷新）的缓冲交给传输协作方，通道满时阻塞。
    pub fn forward(
        &self,
        mut buffer: PacketBuffer,
        interrupt: &InterruptFlag,
    ) -> Result<(), ForwardError> {
        loop {
            match self.tx.send_timeout(buffer, self.poll_interval) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Disconnected(returned)) => {
                    return Err(ForwardError::Disconnected(returned));
                }
                Err(SendTimeoutError::Timeout(returned)) => {
                    if interrupt.take() {
                        return Err(ForwardError::Interrupted(returned));
                    }
                    buffer = returned;
                }
            }
        }
    }

    /// 通道中尚未被取走的缓冲数。
    pub fn pending(&self) -> usize {
        self.tx.len()
    }
}

/// 出站通道的接收端，由传输协作方持有。
///
/// 每个取出的缓冲在发送或丢弃后都必须通过
/// [`BufferPool::reclaim`](crate::BufferPool::reclaim) 归还，否则缓冲池会枯竭。
#[derive(Clone, Debug)]
pub struct Inbound {
    rx: Receiver<PacketBuffer>,
}

impl Inbound {
    /// 阻塞接收；所有发送端释放且通道为空时返回 `None`。
    pub fn recv(&self) -> Option<PacketBuffer> {
        self.rx.recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<PacketBuffer, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }

    pub fn try_recv(&self) -> Result<PacketBuffer, TryRecvError> {
        self.rx.try_recv()
    }

    /// 通道中等待发送的缓冲数。
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
