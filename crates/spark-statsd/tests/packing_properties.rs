//! 打包性质验证。
//!
//! # 教案级注释概览
//!
//! - **核心目标 (Why)**：对任意消息序列与任意报文容量，验证打包结果满足三条性质：
//!   1. 报文不超过容量且不以分隔符结尾；2. 未超长的消息按提交顺序恰好出现一次，从不跨报文拆分；
//!   3. 相邻报文无法合并，即下一报文的首条消息确实放不进上一报文。
//! - **设计手法 (How)**：单工作线程 + 长延迟刷新策略，使报文边界只由容量决定，
//!   从而可以把“贪心装箱”作为影子模型与实际输出逐条对照。
//! - **边界 (What)**：超长消息只会作为错误上报；空消息不产生任何字节。

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};

use proptest::prelude::*;
use spark_statsd::{FlushPolicy, Processor, ProcessorConfig, ProcessorError};

/// 启动处理器、提交全部消息并在关闭后收集报文。
fn run_pipeline(capacity: usize, messages: &[String]) -> (Vec<String>, usize) {
    let config = ProcessorConfig::builder()
        .max_packet_size(capacity)
        .pool_size(2)
        .poll_interval(Duration::from_millis(1))
        .flush_policy(FlushPolicy::max_latency(Duration::from_secs(60)))
        .build()
        .expect("配置应合法");
    let too_long = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&too_long);
    let (mut processor, inbound) = Processor::<String>::new(config, move |err: &ProcessorError| {
        if matches!(err, ProcessorError::MessageTooLong { .. }) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    })
    .expect("启动失败");

    let pool = Arc::clone(processor.pool());
    let collector = thread::spawn(move || {
        let mut packets = Vec::new();
        while let Some(buffer) = inbound.recv() {
            packets.push(String::from_utf8(buffer.as_bytes().to_vec()).expect("报文应为 UTF-8"));
            pool.reclaim(buffer).expect("归还缓冲失败");
        }
        packets
    });

    for message in messages {
        assert!(processor.send(message.clone()), "队列容量足够，不应拒绝");
    }
    assert!(processor.shutdown_and_join(Duration::from_secs(10)));
    let packets = collector.join().expect("消费线程不应 panic");
    (packets, too_long.load(Ordering::Relaxed))
}

fn messages() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[a-z0-9.:|]{0,48}", 0..64)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_packets_respect_capacity_and_preserve_messages(
        capacity in 8usize..40,
        messages in messages(),
    ) {
        let (packets, too_long) = run_pipeline(capacity, &messages);

        for packet in &packets {
            prop_assert!(!packet.is_empty());
            prop_assert!(packet.len() <= capacity);
            prop_assert!(!packet.ends_with('\n'));
        }

        let expected: Vec<&str> = messages
            .iter()
            .map(String::as_str)
            .filter(|line| !line.is_empty() && line.len() <= capacity)
            .collect();
        let delivered: Vec<&str> = packets.iter().flat_map(|packet| packet.split('\n')).collect();
        prop_assert_eq!(delivered, expected);

        let oversized = messages.iter().filter(|line| line.len() > capacity).count();
        prop_assert_eq!(too_long, oversized);
    }

    #[test]
    fn prop_adjacent_packets_could_not_be_merged(
        capacity in 8usize..40,
        messages in messages(),
    ) {
        let (packets, _) = run_pipeline(capacity, &messages);

        for pair in packets.windows(2) {
            let head = pair[1].split('\n').next().unwrap_or_default();
            prop_assert!(
                pair[0].len() + 1 + head.len() > capacity,
                "{:?} 与 {:?} 本可合并", pair[0], head
            );
        }
    }
}
