//! 多值流的端到端回归：推送顺序、完成信号、准入规则、背压与调用方消失。
//!
//! # 教案式说明
//! - **Why**：流条目是协议中唯一带状态的部分，回归需要同时观察回包序列与条目表统计；
//! - **How**：使用暂停的 tokio 时钟，让基于 `sleep` 的值源在空闲时推进，挂起期间的“无回包”可被确定地断言；
//! - **What**：条目释放由条目任务异步完成，统计断言通过 [`eventually`] 轮询。

use std::{sync::Arc, time::Duration};

use futures::{Stream, StreamExt, stream};
use serde_json::{Value, json};
use spark_invoke::{
    ClientError, Cri, Event, EventBus, InvokeConfig, LocalBus, MethodDescriptor, MethodError,
    MethodRegistry, ServiceClient, ServiceDescriptor, Supervisor, ValueType,
    codec,
    error::codes,
    event::headers,
    stream::COMPLETE,
};

struct Counter;

fn ticks() -> impl Stream<Item = Result<i64, MethodError>> + Send + 'static {
    stream::unfold(1_i64, |n| async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        Some((Ok::<_, MethodError>(n), n + 1))
    })
}

fn registry() -> MethodRegistry {
    let descriptor = ServiceDescriptor::with_instance("counter", Arc::new(Counter))
        .method(
            MethodDescriptor::<Counter>::multi("countTo", ValueType::Integer, |_, args| {
                let limit: i64 = args.get(0)?;
                Ok(stream::iter((1..=limit).map(Ok::<_, MethodError>)))
            })
            .param("limit", ValueType::Integer),
        )
        .method(MethodDescriptor::<Counter>::multi("ticks", ValueType::Integer, |_, _| {
            Ok(ticks())
        }))
        .method(MethodDescriptor::<Counter>::multi("faulty", ValueType::Integer, |_, _| {
            Ok(stream::iter(vec![
                Ok(1_i64),
                Err(MethodError::new("Sensor", "sensor offline")),
            ]))
        }))
        .method(MethodDescriptor::<Counter>::multi("refuse", ValueType::Integer, |_, _| {
            Err::<stream::Empty<Result<i64, MethodError>>, _>(MethodError::new(
                "Refused",
                "no streams today",
            ))
        }));
    MethodRegistry::build(descriptor).expect("registry")
}

async fn serve(config: InvokeConfig) -> (Arc<dyn EventBus>, Supervisor) {
    let bus: Arc<dyn EventBus> = Arc::new(LocalBus::new());
    let supervisor = Supervisor::builder(registry(), Arc::clone(&bus))
        .config(config)
        .build();
    supervisor.start().await.expect("start");
    (bus, supervisor)
}

fn method(name: &str) -> Cri {
    Cri::service("counter").with_path(name)
}

fn stream_request(name: &str, correlation_id: &str, args: &str) -> Event {
    Event::new(method(name))
        .with_header(headers::REPLY_TO, "service:caller")
        .with_header(headers::CORRELATION_ID, correlation_id)
        .with_header(headers::CONTENT_TYPE, codec::APPLICATION_JSON)
        .with_payload(args.to_owned())
}

fn value_of(reply: &Event) -> Value {
    assert!(!reply.is_error(), "unexpected error reply: {reply:?}");
    codec::decode_json(reply.payload())
        .expect("json payload")
        .unwrap_or(Value::Null)
}

/// 轮询条件直至成立；条目释放发生在条目任务上，晚于最后一个回包。
async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition was not reached in time");
}

/// `countTo(3)` 依次推送 1、2、3，随后发送完成信号，全部带同一关联标识。
#[tokio::test(start_paused = true)]
async fn count_to_three_pushes_values_then_completes() {
    let (bus, supervisor) = serve(InvokeConfig::default()).await;
    let mut replies = bus.listen(&Cri::service("caller")).await.expect("listen");

    bus.send(stream_request("countTo", "c1", "[3]"));

    let mut values = Vec::new();
    for _ in 0..3 {
        let reply = replies.next().await.expect("value reply");
        assert_eq!(reply.correlation_id(), Some("c1"));
        assert_eq!(reply.control(), None);
        values.push(value_of(&reply));
    }
    assert_eq!(values, vec![json!(1), json!(2), json!(3)]);

    let done = replies.next().await.expect("completion");
    assert_eq!(done.correlation_id(), Some("c1"));
    assert_eq!(done.control(), Some(COMPLETE));
    assert!(done.payload().is_empty());

    eventually(|| supervisor.stream_stats().released_total == 1).await;
    let stats = supervisor.stream_stats();
    assert_eq!(stats.active, 0);
    assert_eq!(stats.created_total, 1);
}

/// 客户端视角：流在完成信号处结束。
#[tokio::test(start_paused = true)]
async fn client_collects_stream_until_complete() {
    let (bus, _supervisor) = serve(InvokeConfig::default()).await;
    let client = ServiceClient::connect(bus, Cri::service("caller"))
        .await
        .expect("connect");

    let values: Vec<Value> = client
        .open_stream(method("countTo"), json!([5]))
        .expect("open")
        .map(|item| item.expect("value"))
        .collect()
        .await;
    assert_eq!(values, vec![json!(1), json!(2), json!(3), json!(4), json!(5)]);
}

/// 同一关联标识至多一个条目，重复请求被静默忽略。
#[tokio::test(start_paused = true)]
async fn duplicate_correlation_id_is_ignored() {
    let (bus, supervisor) = serve(InvokeConfig::default()).await;
    let mut replies = bus.listen(&Cri::service("caller")).await.expect("listen");

    bus.send(stream_request("ticks", "c1", "[]"));
    bus.send(stream_request("ticks", "c1", "[]"));

    for expected in 1..=3 {
        let reply = replies.next().await.expect("tick");
        assert_eq!(value_of(&reply), json!(expected));
    }
    let stats = supervisor.stream_stats();
    assert_eq!(stats.created_total, 1);
    assert_eq!(stats.active, 1);

    bus.send(
        Event::new(method("ticks"))
            .with_header(headers::REPLY_TO, "service:caller")
            .with_header(headers::CORRELATION_ID, "c1")
            .with_header(headers::CONTROL, "cancel"),
    );
    eventually(|| supervisor.stream_stats().released_total == 1).await;
}

/// 重复请求有限流时只有一个条目运行，恰好一次完成信号，之后再无回包。
#[tokio::test(start_paused = true)]
async fn duplicate_count_to_completes_exactly_once() {
    let (bus, supervisor) = serve(InvokeConfig::default()).await;
    let mut replies = bus.listen(&Cri::service("caller")).await.expect("listen");

    bus.send(stream_request("countTo", "c1", "[3]"));
    bus.send(stream_request("countTo", "c1", "[3]"));

    for expected in 1..=3 {
        let reply = replies.next().await.expect("value reply");
        assert_eq!(reply.correlation_id(), Some("c1"));
        assert_eq!(reply.control(), None);
        assert_eq!(value_of(&reply), json!(expected));
    }
    let done = replies.next().await.expect("completion");
    assert_eq!(done.control(), Some(COMPLETE));

    let silent = tokio::time::timeout(Duration::from_secs(1), replies.next()).await;
    assert!(silent.is_err(), "no reply expected after completion, got {silent:?}");

    eventually(|| supervisor.stream_stats().released_total == 1).await;
    let stats = supervisor.stream_stats();
    assert_eq!(stats.created_total, 1);
    assert_eq!(stats.active, 0);
}

/// 挂起期间不推送，恢复后从中断处继续。
#[tokio::test(start_paused = true)]
async fn suspend_pauses_and_resume_continues() {
    let (bus, supervisor) = serve(InvokeConfig::default()).await;
    let client = ServiceClient::connect(bus, Cri::service("caller"))
        .await
        .expect("connect");
    let mut ticks = client.open_stream(method("ticks"), Value::Null).expect("open");

    assert_eq!(ticks.next().await.expect("first").expect("value"), json!(1));
    ticks.suspend();

    let quiet = tokio::time::timeout(Duration::from_secs(1), ticks.next()).await;
    assert!(quiet.is_err(), "no value expected while suspended");

    ticks.resume();
    assert_eq!(ticks.next().await.expect("second").expect("value"), json!(2));
    assert_eq!(ticks.next().await.expect("third").expect("value"), json!(3));

    ticks.cancel();
    eventually(|| supervisor.stream_stats().released_total == 1).await;
    assert_eq!(supervisor.stream_stats().active, 0);
}

/// 调用方停止监听后，条目自动终止并释放。
#[tokio::test(start_paused = true)]
async fn caller_disappearing_terminates_the_stream() {
    let (bus, supervisor) = serve(InvokeConfig::default()).await;
    let mut replies = bus.listen(&Cri::service("caller")).await.expect("listen");

    bus.send(stream_request("ticks", "c1", "[]"));
    assert_eq!(value_of(&replies.next().await.expect("first")), json!(1));

    drop(replies);

    eventually(|| supervisor.stream_stats().released_total == 1).await;
    assert_eq!(supervisor.stream_stats().active, 0);
    assert!(!bus.is_anyone_listening(&Cri::service("caller")).await.expect("query"));
}

/// 客户端仍在监听回包地址时，丢弃未结束的流会取消服务端条目。
#[tokio::test(start_paused = true)]
async fn dropping_an_open_stream_cancels_it() {
    let (bus, supervisor) = serve(InvokeConfig::default()).await;
    let client = ServiceClient::connect(bus, Cri::service("caller"))
        .await
        .expect("connect");
    let mut ticks = client.open_stream(method("ticks"), Value::Null).expect("open");
    assert_eq!(ticks.next().await.expect("first").expect("value"), json!(1));

    drop(ticks);

    eventually(|| supervisor.stream_stats().released_total == 1).await;
    let stats = supervisor.stream_stats();
    assert_eq!(stats.active, 0);
    assert_eq!(stats.created_total, 1);

    // 客户端本身仍可继续发起新的流。
    let values: Vec<Value> = client
        .open_stream(method("countTo"), json!([2]))
        .expect("open")
        .map(|item| item.expect("value"))
        .collect()
        .await;
    assert_eq!(values, vec![json!(1), json!(2)]);
}

/// 调用方在条目启动前就不在时，条目不推送任何值。
#[tokio::test(start_paused = true)]
async fn absent_caller_never_receives_values() {
    let (bus, supervisor) = serve(InvokeConfig::default()).await;

    bus.send(stream_request("ticks", "c1", "[]"));

    eventually(|| supervisor.stream_stats().released_total == 1).await;
    assert_eq!(supervisor.stream_stats().created_total, 1);
}

/// 关闭存活监控时，即使调用方不在，条目也继续运行直至被取消。
#[tokio::test(start_paused = true)]
async fn liveness_monitoring_can_be_disabled() {
    let (bus, supervisor) = serve(InvokeConfig::default().with_monitor_liveness(false)).await;

    bus.send(stream_request("ticks", "c1", "[]"));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(supervisor.stream_stats().active, 1);

    bus.send(
        Event::new(method("ticks"))
            .with_header(headers::CORRELATION_ID, "c1")
            .with_header(headers::CONTROL, "cancel"),
    );
    eventually(|| supervisor.stream_stats().released_total == 1).await;
}

/// 值源中途失败：先前的值照常送达，随后是一条错误回包，不再发送完成信号。
#[tokio::test(start_paused = true)]
async fn failing_source_ends_with_error_reply() {
    let (bus, supervisor) = serve(InvokeConfig::default()).await;
    let client = ServiceClient::connect(bus, Cri::service("caller"))
        .await
        .expect("connect");
    let mut faulty = client.open_stream(method("faulty"), Value::Null).expect("open");

    assert_eq!(faulty.next().await.expect("first").expect("value"), json!(1));
    match faulty.next().await.expect("error item") {
        Err(ClientError::Remote(descriptor)) => {
            assert_eq!(descriptor.type_name, "Sensor");
            assert_eq!(descriptor.code, codes::STREAM_FAILED);
            assert_eq!(descriptor.message, "sensor offline");
        }
        other => panic!("expected a stream failure, got {other:?}"),
    }
    assert!(faulty.next().await.is_none());
    eventually(|| supervisor.stream_stats().released_total == 1).await;
}

/// 方法同步拒绝时回包错误，并立即释放已准入的槽位。
#[tokio::test(start_paused = true)]
async fn synchronous_refusal_releases_the_slot() {
    let (bus, supervisor) = serve(InvokeConfig::default()).await;
    let client = ServiceClient::connect(bus, Cri::service("caller"))
        .await
        .expect("connect");
    let mut refused = client.open_stream(method("refuse"), Value::Null).expect("open");

    match refused.next().await.expect("error item") {
        Err(ClientError::Remote(descriptor)) => {
            assert_eq!(descriptor.type_name, "Refused");
            assert_eq!(descriptor.code, codes::INVOCATION_FAILED);
        }
        other => panic!("expected a refusal, got {other:?}"),
    }
    let stats = supervisor.stream_stats();
    assert_eq!(stats.created_total, 1);
    assert_eq!(stats.released_total, 1);
    assert_eq!(stats.active, 0);
}

/// 多值调用缺少关联标识时回包协议错误。
#[tokio::test(start_paused = true)]
async fn streaming_requires_correlation_id() {
    let (bus, supervisor) = serve(InvokeConfig::default()).await;
    let mut replies = bus.listen(&Cri::service("caller")).await.expect("listen");

    bus.send(
        Event::new(method("countTo"))
            .with_header(headers::REPLY_TO, "service:caller")
            .with_payload("[3]"),
    );

    let reply = replies.next().await.expect("error reply");
    assert!(reply.is_error());
    let descriptor: spark_invoke::resolver::ErrorDescriptor =
        serde_json::from_slice(reply.payload()).expect("descriptor");
    assert_eq!(descriptor.code, codes::PROTOCOL_MISSING_CORRELATION_ID);
    assert_eq!(supervisor.stream_stats().created_total, 0);
}

/// 超过并发上限的新条目被拒绝，已有条目不受影响。
#[tokio::test(start_paused = true)]
async fn capacity_limit_rejects_new_streams() {
    let (bus, supervisor) = serve(InvokeConfig::default().with_max_streams(Some(1))).await;
    let client = ServiceClient::connect(bus, Cri::service("caller"))
        .await
        .expect("connect");

    let mut first = client.open_stream(method("ticks"), Value::Null).expect("open first");
    assert_eq!(first.next().await.expect("tick").expect("value"), json!(1));

    let mut second = client.open_stream(method("ticks"), Value::Null).expect("open second");
    match second.next().await.expect("error item") {
        Err(ClientError::Remote(descriptor)) => {
            assert_eq!(descriptor.code, codes::STREAM_CAPACITY_EXCEEDED);
        }
        other => panic!("expected a capacity failure, got {other:?}"),
    }

    assert_eq!(first.next().await.expect("tick").expect("value"), json!(2));
    assert_eq!(supervisor.stream_stats().created_total, 1);
}
