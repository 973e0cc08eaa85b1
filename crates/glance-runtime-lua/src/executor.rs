use std::future::Future;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use mlua::{Function, HookTriggers, Lua, MultiValue, Value, VmState};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use glance_host_http::{HttpClient, HttpError, HttpPolicy, HttpResponse};
use glance_runtime::{ExecutionOutcome, ExecutionRequest, FailureKind, ScriptExecutor};

use crate::signal::{ScriptSignal, classify};

/// How often the interruption hook polls the cancellation token, in VM
/// instructions. Low enough for sub-second latency in any realistic loop.
const CHECKPOINT_INSTRUCTIONS: u32 = 2048;

/// Shared diagnostic log for one invocation, appended to by the `log`
/// primitive and by HTTP classification.
type LogBuffer = Arc<Mutex<String>>;

/// Executes widget scripts on an embedded Lua VM.
///
/// The blocking VM runs on the blocking thread pool; HTTP primitives bridge
/// back into the async runtime per call. The client (and its policy) is built
/// once and shared across invocations; the VMs themselves never are.
pub struct LuaExecutor {
  http: Arc<HttpClient>,
}

impl LuaExecutor {
  pub fn new(policy: &HttpPolicy) -> Result<Self, HttpError> {
    Ok(Self {
      http: Arc::new(HttpClient::new(policy)?),
    })
  }

  pub fn with_client(http: Arc<HttpClient>) -> Self {
    Self { http }
  }
}

#[async_trait]
impl ScriptExecutor for LuaExecutor {
  #[instrument(
    name = "script_execute",
    skip(self, request, cancel),
    fields(instance_id = %request.instance_id)
  )]
  async fn execute(
    &self,
    request: ExecutionRequest,
    cancel: CancellationToken,
  ) -> ExecutionOutcome {
    if cancel.is_cancelled() {
      return ExecutionOutcome::interrupted();
    }

    let http = self.http.clone();
    let handle = Handle::current();
    let instance_id = request.instance_id.clone();

    let worker = tokio::task::spawn_blocking(move || run_script(http, handle, request, cancel));

    let outcome = match worker.await {
      Ok(outcome) => outcome,
      Err(e) => {
        error!(error = %e, "script worker panicked");
        ExecutionOutcome::failure(FailureKind::Fatal, format!("script worker failed: {e}"))
      }
    };

    match &outcome {
      ExecutionOutcome::Success { payload, .. } => {
        info!(instance_id = %instance_id, payload_len = payload.len(), "script completed");
      }
      ExecutionOutcome::Failure { kind, log } => {
        info!(instance_id = %instance_id, kind = %kind, log = %log, "script failed");
      }
    }

    outcome
  }
}

fn run_script(
  http: Arc<HttpClient>,
  handle: Handle,
  request: ExecutionRequest,
  cancel: CancellationToken,
) -> ExecutionOutcome {
  let log: LogBuffer = Arc::new(Mutex::new(String::new()));

  match eval(&http, &handle, &request, &cancel, &log) {
    Ok((payload, next_run_in)) => ExecutionOutcome::Success {
      payload,
      log: take_log(&log),
      next_run_in,
    },
    Err(err) => {
      let (kind, message) = classify(&err);
      append_log(&log, &message);
      ExecutionOutcome::failure(kind, take_log(&log))
    }
  }
}

/// Build the VM, inject globals and primitives, evaluate the chunk and call
/// the script's `run(previous)` function.
fn eval(
  http: &Arc<HttpClient>,
  handle: &Handle,
  request: &ExecutionRequest,
  cancel: &CancellationToken,
  log: &LogBuffer,
) -> mlua::Result<(String, Option<i64>)> {
  let lua = Lua::new();

  // Cooperative interruption: abort the VM at the next checkpoint after the
  // caller cancels, regardless of what the script is doing.
  {
    let cancel = cancel.clone();
    lua.set_hook(
      HookTriggers::new().every_nth_instruction(CHECKPOINT_INSTRUCTIONS),
      move |_lua, _debug| {
        if cancel.is_cancelled() {
          Err(mlua::Error::external(ScriptSignal::Interrupted))
        } else {
          Ok(VmState::Continue)
        }
      },
    );
  }

  let globals = lua.globals();
  for (key, value) in request.config.iter() {
    globals.set(key, value)?;
  }
  globals.set("instance_id", request.instance_id.as_str())?;
  if let Some(previous) = &request.previous_payload {
    globals.set("previous", previous.as_str())?;
  }

  register_primitives(&lua, http, handle, cancel, log)?;

  lua
    .load(&request.script)
    .set_name(&request.instance_id)
    .exec()?;

  let run: Function = globals.get("run").map_err(|_| {
    mlua::Error::external(ScriptSignal::Fatal(
      "script does not define a run() function".to_string(),
    ))
  })?;

  let returned: MultiValue = run.call(request.previous_payload.clone())?;
  let mut values = returned.into_iter();

  let payload = match values.next() {
    Some(Value::String(s)) => s.to_str()?.to_string(),
    Some(Value::Integer(i)) => i.to_string(),
    Some(Value::Number(n)) => n.to_string(),
    Some(Value::Nil) | None => {
      return Err(mlua::Error::external(ScriptSignal::Fatal(
        "run() returned no payload".to_string(),
      )));
    }
    Some(other) => {
      return Err(mlua::Error::external(ScriptSignal::Fatal(format!(
        "run() must return a string payload, got {}",
        other.type_name()
      ))));
    }
  };

  let next_run_in = match values.next() {
    Some(Value::Integer(i)) => Some(i),
    Some(Value::Number(n)) => Some(n as i64),
    _ => None,
  };

  Ok((payload, next_run_in))
}

fn register_primitives(
  lua: &Lua,
  http: &Arc<HttpClient>,
  handle: &Handle,
  cancel: &CancellationToken,
  log: &LogBuffer,
) -> mlua::Result<()> {
  let globals = lua.globals();

  // get(url [, header, value [, header_to_return]])
  {
    let http = http.clone();
    let handle = handle.clone();
    let cancel = cancel.clone();
    let log = log.clone();
    let get = lua.create_function(
      move |_,
            (url, header, value, return_header): (
        String,
        Option<String>,
        Option<String>,
        Option<String>,
      )| {
        let header_pair = match (&header, &value) {
          (Some(name), Some(value)) => Some((name.as_str(), value.as_str())),
          _ => None,
        };
        let response = block_on_http(
          &handle,
          &cancel,
          http.get(&url, header_pair, return_header.as_deref()),
        )?;
        surface_response(&url, response, &log)
      },
    )?;
    globals.set("get", get)?;
  }

  // post(url, body [, header, value [, media_type]])
  {
    let http = http.clone();
    let handle = handle.clone();
    let cancel = cancel.clone();
    let log = log.clone();
    let post = lua.create_function(
      move |_,
            (url, body, header, value, media_type): (
        String,
        String,
        Option<String>,
        Option<String>,
        Option<String>,
      )| {
        let header_pair = match (&header, &value) {
          (Some(name), Some(value)) => Some((name.as_str(), value.as_str())),
          _ => None,
        };
        let response = block_on_http(
          &handle,
          &cancel,
          http.post(&url, &body, header_pair, media_type.as_deref()),
        )?;
        surface_response(&url, response, &log)
      },
    )?;
    globals.set("post", post)?;
  }

  let btoa = lua.create_function(|_, s: String| Ok(BASE64.encode(s.as_bytes())))?;
  globals.set("btoa", btoa)?;

  {
    let log = log.clone();
    let log_fn = lua.create_function(move |_, message: String| {
      append_log(&log, &message);
      Ok(())
    })?;
    globals.set("log", log_fn)?;
  }

  let remote = lua.create_function(|_, message: Option<String>| -> mlua::Result<()> {
    Err(mlua::Error::external(ScriptSignal::Remote(
      message.unwrap_or_else(|| "remote error".to_string()),
    )))
  })?;
  globals.set("remote_error", remote)?;

  let fatal = lua.create_function(|_, message: Option<String>| -> mlua::Result<()> {
    Err(mlua::Error::external(ScriptSignal::Fatal(
      message.unwrap_or_else(|| "fatal error".to_string()),
    )))
  })?;
  globals.set("fatal_error", fatal)?;

  let timeout = lua.create_function(|_, message: Option<String>| -> mlua::Result<()> {
    Err(mlua::Error::external(ScriptSignal::Timeout(
      message.unwrap_or_else(|| "timeout".to_string()),
    )))
  })?;
  globals.set("timeout_error", timeout)?;

  Ok(())
}

/// Run one HTTP call on the async runtime, raced against cancellation so a
/// script blocked on a slow endpoint still observes a cancel promptly.
fn block_on_http<F>(
  handle: &Handle,
  cancel: &CancellationToken,
  request: F,
) -> mlua::Result<HttpResponse>
where
  F: Future<Output = Result<HttpResponse, HttpError>>,
{
  let result = handle.block_on(async {
    tokio::select! {
      _ = cancel.cancelled() => None,
      result = request => Some(result),
    }
  });

  match result {
    None => Err(mlua::Error::external(ScriptSignal::Interrupted)),
    Some(Ok(response)) => Ok(response),
    Some(Err(e)) => Err(mlua::Error::external(ScriptSignal::Request(e.to_string()))),
  }
}

/// Classify the response status and hand the body (or the requested response
/// header) back to the script. 5xx is a remote failure, any other
/// unsuccessful status a request failure; both surface the body in the log.
fn surface_response(url: &str, response: HttpResponse, log: &LogBuffer) -> mlua::Result<String> {
  if response.status >= 500 {
    append_log(
      log,
      &format!("{} answered {}: {}", url, response.status, response.body),
    );
    return Err(mlua::Error::external(ScriptSignal::Remote(format!(
      "{} answered status {}",
      url, response.status
    ))));
  }
  if !response.is_success() {
    append_log(
      log,
      &format!("{} answered {}: {}", url, response.status, response.body),
    );
    return Err(mlua::Error::external(ScriptSignal::Request(format!(
      "{} answered status {}",
      url, response.status
    ))));
  }

  Ok(response.header.unwrap_or(response.body))
}

fn append_log(log: &LogBuffer, message: &str) {
  let mut buffer = log.lock().unwrap_or_else(|e| e.into_inner());
  if !buffer.is_empty() {
    buffer.push('\n');
  }
  buffer.push_str(message);
}

fn take_log(log: &LogBuffer) -> String {
  std::mem::take(&mut *log.lock().unwrap_or_else(|e| e.into_inner()))
}
