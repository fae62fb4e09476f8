//! Unary interceptors around plain async handlers.

use backend_monitor::monitor::{Context, SpanStatus};
use backend_monitor::rpc::{Code, Status, UnaryServerInfo};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

mod common;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetOrderRequest {
    request_id: String,
    order_id: u64,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct OrderReply {
    item: String,
}

#[tokio::test]
async fn test_server_call_nests_client_call() {
    let (monitor, sink) = common::monitor_with_sink();
    let server = monitor.server_interceptor();
    let client = monitor.client_interceptor();
    let info = UnaryServerInfo::new("/orders.v1.Orders/GetOrder");
    let req = GetOrderRequest {
        request_id: "req-21".into(),
        order_id: 5,
    };

    let reply = server
        .intercept(Context::background(), req, &info, move |ctx, req| async move {
            assert_eq!(ctx.request_id(), Some("req-21"));
            client
                .intercept(&ctx, "/stock.v1.Stock/Reserve", json!({ "orderId": req.order_id }), |_, _| async {
                    Ok::<_, Status>(json!({ "reserved": true }))
                })
                .await?;
            Ok::<_, Status>(OrderReply { item: "tea".into() })
        })
        .await
        .unwrap();
    assert_eq!(reply, OrderReply { item: "tea".into() });

    let root = &sink.transactions_named("/orders.v1.Orders/GetOrder")[0];
    assert_eq!(root.operation, "grpc.server");
    assert_eq!(root.parent_span_id, None);
    assert_eq!(root.tag("requestId"), Some("req-21"));
    assert_eq!(root.tag("code"), Some("0"));
    assert_eq!(root.tag("status"), Some("OK"));
    assert_eq!(root.status, SpanStatus::Ok);

    let call = &sink.transactions_named("grpc.client")[0];
    assert_eq!(call.parent_span_id, Some(root.span_id));
    assert_eq!(call.tag("requestId"), Some("req-21"));
    assert_eq!(call.tag("action"), Some("/stock.v1.Stock/Reserve"));
    assert_eq!(sink.capture_count(), 0);
}

#[tokio::test]
async fn test_handler_error_is_captured_and_tagged() {
    let (monitor, sink) = common::monitor_with_sink();
    let info = UnaryServerInfo::new("/orders.v1.Orders/GetOrder");

    let err = monitor
        .server_interceptor()
        .intercept(
            Context::background(),
            json!({ "requestId": "req-22" }),
            &info,
            |_, _| async { Err::<Value, _>(Status::not_found("order 5")) },
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::NotFound);

    let root = &sink.transactions()[0];
    assert_eq!(root.status, SpanStatus::NotFound);
    assert_eq!(root.tag("code"), Some("5"));
    assert_eq!(root.tag("status"), Some("NOT_FOUND"));
    assert_eq!(root.tag("message"), Some("order 5"));
    assert_eq!(sink.capture_count(), 1);
    assert_eq!(
        sink.events()[0].exception.as_ref().unwrap().value,
        "rpc error: code = NOT_FOUND desc = order 5"
    );
}

async fn explode(_ctx: Context, _req: Value) -> Result<Value, Status> {
    panic!("handler exploded")
}

#[tokio::test]
async fn test_handler_panic_becomes_internal() {
    let (monitor, sink) = common::monitor_with_sink();
    let info = UnaryServerInfo::new("/orders.v1.Orders/Explode");

    let err = monitor
        .server_interceptor()
        .intercept(Context::background(), json!({}), &info, explode)
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::Internal);

    let root = &sink.transactions()[0];
    assert_eq!(root.status, SpanStatus::InternalError);
    assert_eq!(root.tag("requestId"), Some(""));
    assert_eq!(sink.capture_count(), 1);
    assert_eq!(sink.events()[0].message, "panic: handler exploded");
}

#[tokio::test]
async fn test_client_without_active_span_is_a_root() {
    let (monitor, sink) = common::monitor_with_sink();
    let ctx = Context::background().with_request_id("req-23");

    let err = monitor
        .client_interceptor()
        .intercept(&ctx, "/stock.v1.Stock/Reserve", json!({ "orderId": 1 }), |_, _| async {
            Err::<Value, _>(Status::unavailable("stock service down"))
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::Unavailable);

    let span = &sink.transactions_named("/stock.v1.Stock/Reserve")[0];
    assert_eq!(span.operation, "grpc.client");
    assert_eq!(span.parent_span_id, None);
    assert_eq!(span.tag("requestId"), Some("req-23"));
    assert_eq!(span.status, SpanStatus::Unavailable);
    assert_eq!(sink.capture_count(), 1);
}
