use std::{
    convert::Infallible,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, RwLock,
    },
};

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hyper::service::{make_service_fn, service_fn};
use hyper::{body, Body, Method, Request, Response, Server, StatusCode};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// A scripted Tendermint chain. Heights start at 1; only heights up to the
/// tip limit are served.
#[derive(Clone)]
pub struct MockChain {
    blocks: Arc<RwLock<Vec<MockBlock>>>,
    tip_limit: Arc<AtomicU64>,
}

#[derive(Clone)]
struct MockBlock {
    txs: Vec<String>,
    results: Vec<Value>,
}

impl MockChain {
    pub fn new(empty_blocks: u64) -> Self {
        let chain = Self {
            blocks: Arc::new(RwLock::new(Vec::new())),
            tip_limit: Arc::new(AtomicU64::new(0)),
        };
        for _ in 0..empty_blocks {
            chain.push_block(Vec::new());
        }
        chain
    }

    /// Appends a block holding one successful tx per message list and
    /// moves the tip onto it.
    pub fn push_block(&self, txs: Vec<Vec<Value>>) -> u64 {
        let mut blocks = self.blocks.write().expect("mock chain poisoned");
        let (txs, results) = txs
            .into_iter()
            .map(|messages| {
                let tx = json!({
                    "body": {"messages": messages},
                    "auth_info": {"fee": {"amount": [{"denom": "ubadge", "amount": "500"}], "gas_limit": "100"}}
                });
                let result = json!({"code": 0, "log": "", "gas_wanted": "100", "gas_used": "80", "events": []});
                (STANDARD.encode(tx.to_string()), result)
            })
            .unzip();
        blocks.push(MockBlock { txs, results });
        let height = blocks.len() as u64;
        self.tip_limit.store(height, Ordering::SeqCst);
        height
    }

    pub fn best_height(&self) -> u64 {
        self.tip_limit.load(Ordering::SeqCst)
    }

    pub fn set_tip_limit(&self, limit: u64) {
        let max = self.blocks.read().expect("mock chain poisoned").len() as u64;
        self.tip_limit.store(limit.min(max), Ordering::SeqCst);
    }

    fn block(&self, height: u64) -> Option<MockBlock> {
        if height == 0 || height > self.best_height() {
            return None;
        }
        let blocks = self.blocks.read().expect("mock chain poisoned");
        blocks.get(height as usize - 1).cloned()
    }
}

/// One second per block from midnight, enough for any scripted chain.
fn block_time(height: u64) -> String {
    let (hours, rest) = (height / 3_600 % 24, height % 3_600);
    format!("2024-03-01T{hours:02}:{:02}:{:02}.500Z", rest / 60, rest % 60)
}

pub struct MockRpcServer {
    url: String,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl MockRpcServer {
    pub async fn start(chain: MockChain) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("failed to bind mock RPC listener")?;
        let addr = listener
            .local_addr()
            .context("failed to read mock listener address")?;
        let std_listener = listener
            .into_std()
            .context("failed to convert mock listener")?;
        std_listener
            .set_nonblocking(true)
            .context("failed to set mock listener non-blocking")?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let make_service = make_service_fn(move |_| {
            let chain = chain.clone();
            async move { Ok::<_, Infallible>(service_fn(move |req| serve_request(chain.clone(), req))) }
        });

        let server = Server::from_tcp(std_listener)
            .context("failed to build mock HTTP server")?
            .serve(make_service);
        let graceful = server.with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });

        let handle = tokio::spawn(async move {
            if let Err(err) = graceful.await {
                eprintln!("mock RPC server stopped: {err}");
            }
        });

        Ok(Self {
            url: format!("http://{}", addr),
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

/// A loopback URL nothing listens on, so connections are refused.
pub async fn refused_url() -> Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .context("failed to reserve a local port")?;
    let addr = listener.local_addr()?;
    drop(listener);
    Ok(format!("http://{addr}"))
}

async fn serve_request(chain: MockChain, req: Request<Body>) -> Result<Response<Body>, Infallible> {
    if req.method() != Method::POST {
        let mut response = Response::new(Body::from("Unsupported method"));
        *response.status_mut() = StatusCode::METHOD_NOT_ALLOWED;
        return Ok(response);
    }

    let bytes = match body::to_bytes(req.into_body()).await {
        Ok(bytes) => bytes,
        Err(err) => {
            let mut response = Response::new(Body::from(format!("failed to read body: {err}")));
            *response.status_mut() = StatusCode::BAD_REQUEST;
            return Ok(response);
        }
    };

    let payload: Value = match serde_json::from_slice(&bytes) {
        Ok(value) => value,
        Err(err) => {
            let mut response = Response::new(Body::from(format!("invalid JSON payload: {err}")));
            *response.status_mut() = StatusCode::BAD_REQUEST;
            return Ok(response);
        }
    };

    let mut response = Response::new(Body::from(handle_call(&chain, payload).to_string()));
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("application/json"),
    );
    Ok(response)
}

fn handle_call(chain: &MockChain, call: Value) -> Value {
    let id = call.get("id").cloned().unwrap_or(Value::Null);
    let method = call
        .get("method")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let height = call
        .get("params")
        .and_then(|params| params.get("height"))
        .and_then(|value| match value {
            Value::String(text) => text.parse::<u64>().ok(),
            other => other.as_u64(),
        })
        .unwrap_or_else(|| chain.best_height());

    match method.as_str() {
        "status" => success(
            id,
            json!({"sync_info": {"latest_block_height": chain.best_height().to_string(), "catching_up": false}}),
        ),
        "block" => match chain.block(height) {
            Some(block) => success(
                id,
                json!({
                    "block_id": {"hash": format!("{height:064X}")},
                    "block": {
                        "header": {"height": height.to_string(), "time": block_time(height)},
                        "data": {"txs": block.txs}
                    }
                }),
            ),
            None => height_unavailable(id, height, chain.best_height()),
        },
        "block_results" => match chain.block(height) {
            Some(block) => success(
                id,
                json!({"height": height.to_string(), "txs_results": block.results}),
            ),
            None => height_unavailable(id, height, chain.best_height()),
        },
        _ => error(id, -32601, format!("unknown method {method}"), None),
    }
}

fn height_unavailable(id: Value, height: u64, tip: u64) -> Value {
    error(
        id,
        -32603,
        "Internal error",
        Some(format!(
            "height {height} must be less than or equal to the current blockchain height {tip}"
        )),
    )
}

fn success(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "result": result,
        "id": id,
    })
}

fn error(id: Value, code: i64, message: impl Into<String>, data: Option<String>) -> Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(data) = data {
        error["data"] = Value::String(data);
    }
    json!({
        "jsonrpc": "2.0",
        "error": error,
        "id": id,
    })
}
