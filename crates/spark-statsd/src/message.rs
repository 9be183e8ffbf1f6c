//! 生产者提交的消息契约。
//!
//! 单条指标的线格式不在本 crate 范围内：调用方要么提交已经渲染好的文本行，
//! 要么为自己的事件类型实现 [`Message`]。

use std::{fmt, sync::Arc};

/// 能够把自身序列化为一行文本的指标事件。
///
/// # 教案式说明
/// - **意图 (Why)**：队列只持有尚未序列化的事件，序列化推迟到工作线程执行，
///   避免生产者线程承担格式化开销；
/// - **契约 (What)**：
///   - `write_to` 只能追加，不得清空 `out`；返回 `Err` 视为意外序列化故障，消息被丢弃并上报；
///   - `lower_bound_size` 是写入前的廉价估计，只能偏小不能偏大，默认 0；
///   - 入队后消息不可变，所有权随出队转移给工作线程。
pub trait Message: Send + 'static {
    /// 将序列化文本追加到 `out`。
    fn write_to(&self, out: &mut String) -> fmt::Result;

    /// 序列化长度的下界估计，用于预留暂存空间。
    fn lower_bound_size(&self) -> usize {
        0
    }
}

impl Message for String {
    fn write_to(&self, out: &mut String) -> fmt::Result {
        out.push_str(self);
        Ok(())
    }

    fn lower_bound_size(&self) -> usize {
        self.len()
    }
}

impl Message for &'static str {
    fn write_to(&self, out: &mut String) -> fmt::Result {
        out.push_str(self);
        Ok(())
    }

    fn lower_bound_size(&self) -> usize {
        self.len()
    }
}

impl Message for Box<str> {
    fn write_to(&self, out: &mut String) -> fmt::Result {
        out.push_str(self);
        Ok(())
    }

    fn lower_bound_size(&self) -> usize {
        self.len()
    }
}

impl Message for Arc<str> {
    fn write_to(&self, out: &mut String) -> fmt::Result {
        out.push_str(self);
        Ok(())
    }

    fn lower_bound_size(&self) -> usize {
        self.len()
    }
}

impl Message for Box<dyn Message> {
    fn write_to(&self, out: &mut String) -> fmt::Result {
        (**self).write_to(out)
    }

    fn lower_bound_size(&self) -> usize {
        (**self).lower_bound_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt::Write;

    struct Gauge {
        name: &'static str,
        value: i64,
    }

    impl Message for Gauge {
        fn write_to(&self, out: &mut String) -> fmt::Result {
            write!(out, "{}:{}|g", self.name, self.value)
        }
    }

    #[test]
    fn boxed_messages_delegate() {
        let boxed: Box<dyn Message> = Box::new(Gauge {
            name: "queue.depth",
            value: 7,
        });
        let mut out = String::from("prefix;");
        boxed.write_to(&mut out).expect("序列化失败");
        assert_eq!(out, "prefix;queue.depth:7|g");
        assert_eq!(boxed.lower_bound_size(), 0);
    }

    #[test]
    fn text_lines_report_exact_lower_bound() {
        let line: Arc<str> = Arc::from("page.views:1|c");
        assert_eq!(line.lower_bound_size(), 14);
        assert_eq!("a:1|c".lower_bound_size(), 5);
    }
}
