use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use glance_host_http::HttpPolicy;
use glance_runtime::{ExecutionOutcome, ExecutionRequest, FailureKind, ScriptExecutor};
use glance_runtime_lua::LuaExecutor;
use glance_widget::ConfigMap;

fn executor() -> LuaExecutor {
  LuaExecutor::new(&HttpPolicy::default()).unwrap()
}

fn request(script: &str) -> ExecutionRequest {
  ExecutionRequest {
    instance_id: "inst-1".to_string(),
    script: script.to_string(),
    config: ConfigMap::default(),
    previous_payload: None,
  }
}

async fn run(script: &str) -> ExecutionOutcome {
  executor()
    .execute(request(script), CancellationToken::new())
    .await
}

/// Serve `count` connections with a fixed raw HTTP response, then stop.
async fn serve_raw(response: &'static str, count: usize) -> String {
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let addr = listener.local_addr().unwrap();
  tokio::spawn(async move {
    for _ in 0..count {
      let (mut socket, _) = match listener.accept().await {
        Ok(conn) => conn,
        Err(_) => return,
      };
      let mut buf = [0u8; 4096];
      let _ = socket.read(&mut buf).await;
      let _ = socket.write_all(response.as_bytes()).await;
      let _ = socket.shutdown().await;
    }
  });
  format!("http://{addr}")
}

#[tokio::test(flavor = "multi_thread")]
async fn returns_payload_and_log() {
  let outcome = run(
    r#"
    function run()
      log("building payload")
      return "hello"
    end
    "#,
  )
  .await;

  match outcome {
    ExecutionOutcome::Success {
      payload,
      log,
      next_run_in,
    } => {
      assert_eq!(payload, "hello");
      assert_eq!(log, "building payload");
      assert_eq!(next_run_in, None);
    }
    other => panic!("expected success, got {other:?}"),
  }
}

#[tokio::test(flavor = "multi_thread")]
async fn second_return_value_overrides_delay() {
  let outcome = run(
    r#"
    function run()
      return "data", 120
    end
    "#,
  )
  .await;

  match outcome {
    ExecutionOutcome::Success { next_run_in, .. } => assert_eq!(next_run_in, Some(120)),
    other => panic!("expected success, got {other:?}"),
  }
}

#[tokio::test(flavor = "multi_thread")]
async fn config_entries_become_globals() {
  let mut req = request(
    r#"
    function run()
      return hostname .. ":" .. port
    end
    "#,
  );
  req.config.set("hostname", "db01");
  req.config.set("port", "5432");

  let outcome = executor().execute(req, CancellationToken::new()).await;
  match outcome {
    ExecutionOutcome::Success { payload, .. } => assert_eq!(payload, "db01:5432"),
    other => panic!("expected success, got {other:?}"),
  }
}

#[tokio::test(flavor = "multi_thread")]
async fn previous_payload_is_passed_to_run() {
  let mut req = request(
    r#"
    function run(previous)
      if previous == nil then
        return "first"
      end
      return previous .. "+again"
    end
    "#,
  );
  req.previous_payload = Some("first".to_string());

  let outcome = executor().execute(req, CancellationToken::new()).await;
  match outcome {
    ExecutionOutcome::Success { payload, .. } => assert_eq!(payload, "first+again"),
    other => panic!("expected success, got {other:?}"),
  }
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_run_function_is_fatal() {
  let outcome = run("x = 1").await;
  match outcome {
    ExecutionOutcome::Failure { kind, log } => {
      assert_eq!(kind, FailureKind::Fatal);
      assert!(log.contains("run()"), "log was: {log}");
    }
    other => panic!("expected failure, got {other:?}"),
  }
}

#[tokio::test(flavor = "multi_thread")]
async fn syntax_error_is_fatal() {
  let outcome = run("function run( return end").await;
  assert_eq!(outcome.kind(), Some(FailureKind::Fatal));
}

#[tokio::test(flavor = "multi_thread")]
async fn error_helpers_classify() {
  let remote = run(r#"function run() remote_error("backend down") end"#).await;
  assert_eq!(remote.kind(), Some(FailureKind::Remote));
  assert!(remote.log().contains("backend down"));

  let fatal = run(r#"function run() fatal_error("bad config") end"#).await;
  assert_eq!(fatal.kind(), Some(FailureKind::Fatal));

  let timeout = run(r#"function run() timeout_error("too slow") end"#).await;
  assert_eq!(timeout.kind(), Some(FailureKind::Timeout));
}

#[tokio::test(flavor = "multi_thread")]
async fn btoa_encodes_base64() {
  let outcome = run(
    r#"
    function run()
      return btoa("user:pass")
    end
    "#,
  )
  .await;
  match outcome {
    ExecutionOutcome::Success { payload, .. } => assert_eq!(payload, "dXNlcjpwYXNz"),
    other => panic!("expected success, got {other:?}"),
  }
}

#[tokio::test(flavor = "multi_thread")]
async fn infinite_loop_is_interrupted_by_cancel() {
  let executor = Arc::new(executor());
  let cancel = CancellationToken::new();
  let child = cancel.clone();

  let task = tokio::spawn({
    let executor = executor.clone();
    async move {
      executor
        .execute(request("function run() while true do end end"), child)
        .await
    }
  });

  tokio::time::sleep(Duration::from_millis(100)).await;
  cancel.cancel();

  let outcome = tokio::time::timeout(Duration::from_secs(5), task)
    .await
    .expect("cancelled script did not unwind")
    .unwrap();
  assert!(outcome.is_interrupted());
}

#[tokio::test(flavor = "multi_thread")]
async fn http_get_returns_body() {
  let base = serve_raw(
    "HTTP/1.1 200 OK\r\nContent-Length: 4\r\nConnection: close\r\n\r\n42.5",
    1,
  )
  .await;

  let mut req = request(
    r#"
    function run()
      return get(endpoint)
    end
    "#,
  );
  req.config.set("endpoint", &base);

  let outcome = executor().execute(req, CancellationToken::new()).await;
  match outcome {
    ExecutionOutcome::Success { payload, .. } => assert_eq!(payload, "42.5"),
    other => panic!("expected success, got {other:?}"),
  }
}

#[tokio::test(flavor = "multi_thread")]
async fn http_5xx_is_remote_failure() {
  let base = serve_raw(
    "HTTP/1.1 500 Internal Server Error\r\nContent-Length: 4\r\nConnection: close\r\n\r\noops",
    1,
  )
  .await;

  let mut req = request("function run() return get(endpoint) end");
  req.config.set("endpoint", &base);

  let outcome = executor().execute(req, CancellationToken::new()).await;
  assert_eq!(outcome.kind(), Some(FailureKind::Remote));
  assert!(outcome.log().contains("oops"), "log was: {}", outcome.log());
}

#[tokio::test(flavor = "multi_thread")]
async fn http_4xx_is_request_failure() {
  let base = serve_raw(
    "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
    1,
  )
  .await;

  let mut req = request("function run() return get(endpoint) end");
  req.config.set("endpoint", &base);

  let outcome = executor().execute(req, CancellationToken::new()).await;
  assert_eq!(outcome.kind(), Some(FailureKind::Request));
}

#[tokio::test(flavor = "multi_thread")]
async fn unreachable_endpoint_is_request_failure() {
  let mut req = request("function run() return get(endpoint) end");
  // Reserved port on localhost nothing listens on.
  req.config.set("endpoint", "http://127.0.0.1:1");

  let outcome = executor().execute(req, CancellationToken::new()).await;
  assert_eq!(outcome.kind(), Some(FailureKind::Request));
}

#[tokio::test(flavor = "multi_thread")]
async fn script_can_recover_from_request_failure() {
  let mut req = request(
    r#"
    function run()
      local ok, err = pcall(get, endpoint)
      if not ok then
        return "fallback"
      end
      return "unexpected"
    end
    "#,
  );
  req.config.set("endpoint", "http://127.0.0.1:1");

  let outcome = executor().execute(req, CancellationToken::new()).await;
  match outcome {
    ExecutionOutcome::Success { payload, .. } => assert_eq!(payload, "fallback"),
    other => panic!("expected success, got {other:?}"),
  }
}
