use bytes::{BufMut, BytesMut};

/// 分隔相邻消息的单字节换行符。
pub const SEPARATOR: u8 = b'\n';

/// 写入超出剩余容量时返回的标记。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Overflow {
    /// 尝试写入的字节数。
    pub requested: usize,
    /// 写入时的剩余空间。
    pub remaining: usize,
}

/// 固定容量的报文缓冲。
///
/// # 教案式说明
/// - **意图 (Why)**：每个缓冲对应一个待发送的数据报，容量一旦确定就不再增长，
///   以此保证报文永远不会超过最大数据报限制；
/// - **逻辑 (How)**：底层是预留好容量的 `BytesMut`，`len()` 即写游标；
///   `mark`/`reset` 记录并回退游标，用于撤销溢出时的半条写入；
/// - **契约 (What)**：
///   - `try_put` 要么完整写入，要么一个字节都不写；
///   - 类型不实现 `Clone`，所有权转移即唯一持有者令牌：池（空闲）→ 工作线程（填充中）
///     → 出站通道（传输中）→ 传输协作方（发送中）→ 池（回收）。
#[derive(Debug)]
pub struct PacketBuffer {
    bytes: BytesMut,
    capacity: usize,
    mark: usize,
}

impl PacketBuffer {
    /// 分配一个容量为 `capacity` 字节的空缓冲。
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: BytesMut::with_capacity(capacity),
            capacity,
            mark: 0,
        }
    }

    /// 固定容量。
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 已写入的字节数，即写游标位置。
    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// 剩余可写字节数。
    #[inline]
    pub fn remaining(&self) -> usize {
        self.capacity - self.bytes.len()
    }

    /// 记录当前游标，供 [`reset`](Self::reset) 回退。
    pub fn mark(&mut self) {
        self.mark = self.bytes.len();
    }

    /// 回退到最近一次 [`mark`](Self::mark) 的位置。
    pub fn reset(&mut self) {
        self.bytes.truncate(self.mark);
    }

    /// 原子地追加 `data`。
    pub fn try_put(&mut self, data: &[u8]) -> Result<(), Overflow> {
        let remaining = self.remaining();
        if data.len() > remaining {
            return Err(Overflow {
                requested: data.len(),
                remaining,
            });
        }
        self.bytes.put_slice(data);
        Ok(())
    }

    /// 追加一个分隔符。
    pub fn put_separator(&mut self) -> Result<(), Overflow> {
        self.try_put(&[SEPARATOR])
    }

    /// 已写入的内容，边界即写游标。
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// 清空内容与标记，保留底层内存。
    pub fn clear(&mut self) {
        self.bytes.clear();
        self.mark = 0;
    }
}

impl AsRef<[u8]> for PacketBuffer {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_is_all_or_nothing() {
        let mut buffer = PacketBuffer::with_capacity(8);
        buffer.try_put(b"abcde").expect("写入应成功");
        let err = buffer.try_put(b"fghi").expect_err("超出容量应失败");
        assert_eq!(
            err,
            Overflow {
                requested: 4,
                remaining: 3
            }
        );
        assert_eq!(buffer.as_bytes(), b"abcde");
        assert_eq!(buffer.remaining(), 3);
    }

    #[test]
    fn reset_rolls_back_to_mark() {
        let mut buffer = PacketBuffer::with_capacity(16);
        buffer.try_put(b"a:1|c").expect("写入应成功");
        buffer.mark();
        buffer.put_separator().expect("分隔符写入应成功");
        buffer.try_put(b"b:2").expect("写入应成功");
        buffer.reset();
        assert_eq!(buffer.as_bytes(), b"a:1|c");
    }

    #[test]
    fn clear_keeps_capacity() {
        let mut buffer = PacketBuffer::with_capacity(4);
        buffer.try_put(b"full").expect("恰好写满应成功");
        assert_eq!(buffer.remaining(), 0);
        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.capacity(), 4);
        assert_eq!(buffer.remaining(), 4);
    }
}
