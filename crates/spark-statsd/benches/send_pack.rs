use criterion::{BatchSize, Criterion, black_box};
use spark_statsd::{MessageQueue, Processor, ProcessorConfig};
use std::{env, sync::Arc, thread, time::Duration};

/// 生产者热路径与端到端打包吞吐的基准。
///
/// # 设计背景（Why）
/// - `send` 位于业务热路径，准入检查与入队的成本需要持续监控；
/// - 打包吞吐决定了处理器在高峰期能否跟上生产速率，回归应尽早暴露。
///
/// # 逻辑解析（How）
/// - `queue_offer_poll`：单线程入队再出队，测量无锁队列与准入计数器的往返成本；
/// - `send_and_drain_1k`：提交 1000 条消息并关闭排空，消费线程同步归还缓冲。
fn bench_queue(c: &mut Criterion) {
    let queue = MessageQueue::new(1024);
    c.bench_function("queue_offer_poll", |b| {
        b.iter(|| {
            let _ = queue.offer(black_box("requests:1|c"));
            black_box(queue.poll())
        });
    });
}

fn bench_send_and_drain(c: &mut Criterion) {
    let lines: Vec<String> = (0..1000).map(|n| format!("service.requests.{n}:1|c")).collect();
    c.bench_function("send_and_drain_1k", |b| {
        b.iter_batched(
            || lines.clone(),
            |lines| {
                let config = ProcessorConfig::builder()
                    .poll_interval(Duration::from_micros(100))
                    .build()
                    .expect("配置应合法");
                let (mut processor, inbound) =
                    Processor::<String>::with_logging_handler(config).expect("启动失败");
                let pool = Arc::clone(processor.pool());
                let consumer = thread::spawn(move || {
                    let mut bytes = 0;
                    while let Some(buffer) = inbound.recv() {
                        bytes += buffer.len();
                        let _ = pool.reclaim(buffer);
                    }
                    bytes
                });
                for line in lines {
                    processor.send(line);
                }
                processor.shutdown_and_join(Duration::from_secs(10));
                black_box(consumer.join().expect("消费线程不应 panic"))
            },
            BatchSize::SmallInput,
        );
    });
}

fn main() {
    let mut quick_mode = false;
    for arg in env::args().skip(1) {
        if arg == "--quick" {
            quick_mode = true;
        }
    }

    let mut criterion = Criterion::default();
    if quick_mode {
        criterion = criterion
            .sample_size(10)
            .warm_up_time(Duration::from_millis(100))
            .measurement_time(Duration::from_millis(250));
    }

    bench_queue(&mut criterion);
    bench_send_and_drain(&mut criterion);
    criterion.final_summary();
}
