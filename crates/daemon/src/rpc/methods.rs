// JSON-RPC method dispatch for the lease daemon.
//
// Conflicts, rate limits and ownership mismatches are successful responses
// carrying a `status`; only bad params and ledger failures are RPC errors.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tessera_common::protocol::jsonrpc::{
    is_supported_protocol_version, Request, RequestId, Response, RpcError, INVALID_PARAMS,
    INVALID_REQUEST, LEDGER_UNAVAILABLE, METHOD_NOT_FOUND, PARSE_ERROR,
};
use tessera_common::protocol::lease::{
    EditorEventParams, HolderParams, LeaseGetResult, LeaseMineResult, ResourceParams,
};
use tessera_common::protocol::rpc_methods;
use tokio::sync::broadcast;
use tracing::debug;

use crate::clock::Clock;
use crate::editor::EditCoordinator;
use crate::lease::{LeaseError, LeaseManager};
use crate::ledger::LedgerTransport;

pub struct RpcServerState<T: LedgerTransport, C: Clock> {
    manager: Arc<LeaseManager<T, C>>,
    editor: Arc<EditCoordinator<T, C>>,
    shutdown_notifier: Option<broadcast::Sender<()>>,
}

impl<T: LedgerTransport, C: Clock> Clone for RpcServerState<T, C> {
    fn clone(&self) -> Self {
        Self {
            manager: Arc::clone(&self.manager),
            editor: Arc::clone(&self.editor),
            shutdown_notifier: self.shutdown_notifier.clone(),
        }
    }
}

impl<T: LedgerTransport, C: Clock> RpcServerState<T, C> {
    pub fn new(manager: Arc<LeaseManager<T, C>>, editor: Arc<EditCoordinator<T, C>>) -> Self {
        Self { manager, editor, shutdown_notifier: None }
    }

    pub fn with_shutdown_notifier(mut self, shutdown_notifier: broadcast::Sender<()>) -> Self {
        self.shutdown_notifier = Some(shutdown_notifier);
        self
    }

    pub fn manager(&self) -> &Arc<LeaseManager<T, C>> {
        &self.manager
    }

    fn holder_or_identity(&self, holder: Option<String>) -> String {
        holder.unwrap_or_else(|| self.manager.identity().to_string())
    }
}

pub async fn handle_raw_request<T: LedgerTransport, C: Clock>(
    raw: &[u8],
    state: &RpcServerState<T, C>,
) -> Response {
    let request = match serde_json::from_slice::<Request>(raw) {
        Ok(request) => request,
        Err(error) => {
            return Response::error(
                RequestId::Null,
                RpcError::new(PARSE_ERROR, "Parse error")
                    .with_data(json!({ "reason": error.to_string() })),
            );
        }
    };

    if request.jsonrpc != "2.0" {
        return Response::error(request.id, RpcError::new(INVALID_REQUEST, "Invalid Request"));
    }
    if let Some(version) = request.protocol_version.as_deref() {
        if !is_supported_protocol_version(version) {
            return Response::error(
                request.id,
                RpcError::new(INVALID_REQUEST, "Unsupported protocol version")
                    .with_data(json!({ "protocol_version": version })),
            );
        }
    }

    dispatch_request(request, state).await
}

pub async fn dispatch_request<T: LedgerTransport, C: Clock>(
    request: Request,
    state: &RpcServerState<T, C>,
) -> Response {
    debug!(method = %request.method, "rpc request");
    match request.method.as_str() {
        rpc_methods::RPC_PING => Response::success(request.id, json!({ "ok": true })),
        rpc_methods::DAEMON_SHUTDOWN => {
            if let Some(notifier) = &state.shutdown_notifier {
                let _ = notifier.send(());
            }
            Response::success(request.id, json!({ "ok": true }))
        }
        rpc_methods::LEASE_RESERVE => handle_reserve(request, state).await,
        rpc_methods::LEASE_EXTEND => handle_extend(request, state).await,
        rpc_methods::LEASE_RELEASE => handle_release(request, state).await,
        rpc_methods::LEASE_RELEASE_ALL => handle_release_all(request, state).await,
        rpc_methods::LEASE_GET => handle_get(request, state),
        rpc_methods::LEASE_MINE => handle_mine(request, state),
        rpc_methods::LEASE_RECONCILE => handle_reconcile(request, state).await,
        rpc_methods::EDITOR_EVENT => handle_editor_event(request, state).await,
        _ => Response::error(request.id, RpcError::new(METHOD_NOT_FOUND, "Method not found")),
    }
}

// ── lease.* ────────────────────────────────────────────────────────

async fn handle_reserve<T: LedgerTransport, C: Clock>(
    request: Request,
    state: &RpcServerState<T, C>,
) -> Response {
    let params = match parse_params::<ResourceParams>(&request) {
        Ok(params) => params,
        Err(response) => return response,
    };
    let holder = state.holder_or_identity(params.holder);
    respond(request.id, state.manager.reserve(&params.resource, &holder).await)
}

async fn handle_extend<T: LedgerTransport, C: Clock>(
    request: Request,
    state: &RpcServerState<T, C>,
) -> Response {
    let params = match parse_params::<ResourceParams>(&request) {
        Ok(params) => params,
        Err(response) => return response,
    };
    let holder = state.holder_or_identity(params.holder);
    respond(request.id, state.manager.extend(&params.resource, &holder).await)
}

async fn handle_release<T: LedgerTransport, C: Clock>(
    request: Request,
    state: &RpcServerState<T, C>,
) -> Response {
    let params = match parse_params::<ResourceParams>(&request) {
        Ok(params) => params,
        Err(response) => return response,
    };
    let holder = state.holder_or_identity(params.holder);
    respond(request.id, state.manager.release(&params.resource, &holder).await)
}

async fn handle_release_all<T: LedgerTransport, C: Clock>(
    request: Request,
    state: &RpcServerState<T, C>,
) -> Response {
    let params = match parse_optional_params::<HolderParams>(&request) {
        Ok(params) => params,
        Err(response) => return response,
    };
    let holder = state.holder_or_identity(params.holder);
    let report = state.manager.release_all(&holder).await;
    Response::success(request.id, json!(report))
}

fn handle_get<T: LedgerTransport, C: Clock>(
    request: Request,
    state: &RpcServerState<T, C>,
) -> Response {
    let params = match parse_params::<ResourceParams>(&request) {
        Ok(params) => params,
        Err(response) => return response,
    };
    let result = state
        .manager
        .get_lease(&params.resource)
        .map(|lease| LeaseGetResult { resource: params.resource, lease });
    respond(request.id, result)
}

fn handle_mine<T: LedgerTransport, C: Clock>(
    request: Request,
    state: &RpcServerState<T, C>,
) -> Response {
    let params = match parse_optional_params::<HolderParams>(&request) {
        Ok(params) => params,
        Err(response) => return response,
    };
    let holder = state.holder_or_identity(params.holder);
    let leases = state.manager.my_leases(&holder);
    Response::success(request.id, json!(LeaseMineResult { holder, leases }))
}

async fn handle_reconcile<T: LedgerTransport, C: Clock>(
    request: Request,
    state: &RpcServerState<T, C>,
) -> Response {
    respond(request.id, state.manager.force_reconcile().await)
}

// ── editor.* ───────────────────────────────────────────────────────

async fn handle_editor_event<T: LedgerTransport, C: Clock>(
    request: Request,
    state: &RpcServerState<T, C>,
) -> Response {
    let params = match parse_params::<EditorEventParams>(&request) {
        Ok(params) => params,
        Err(response) => return response,
    };
    respond(request.id, state.editor.handle(params.kind, &params.resource).await)
}

// ── Helpers ────────────────────────────────────────────────────────

fn parse_params<P: DeserializeOwned>(request: &Request) -> Result<P, Response> {
    let Some(params) = request.params.clone() else {
        return Err(invalid_params_response(
            request.id.clone(),
            format!("{} requires params", request.method),
        ));
    };
    serde_json::from_value::<P>(params).map_err(|error| {
        invalid_params_response(
            request.id.clone(),
            format!("failed to decode {} params: {error}", request.method),
        )
    })
}

fn parse_optional_params<P: DeserializeOwned + Default>(request: &Request) -> Result<P, Response> {
    if request.params.is_none() {
        return Ok(P::default());
    }
    parse_params(request)
}

fn respond<R: Serialize>(request_id: RequestId, result: Result<R, LeaseError>) -> Response {
    match result {
        Ok(value) => Response::success(request_id, json!(value)),
        Err(error) => lease_error_response(request_id, error),
    }
}

fn lease_error_response(request_id: RequestId, error: LeaseError) -> Response {
    match &error {
        LeaseError::InvalidResource(_) | LeaseError::InvalidEntry(_) => {
            invalid_params_response(request_id, error.to_string())
        }
        LeaseError::Transport { resource, source } => Response::error(
            request_id,
            RpcError::new(LEDGER_UNAVAILABLE, "Ledger unavailable").with_data(json!({
                "resource": resource,
                "operation": source.op().as_str(),
                "reason": error.to_string(),
            })),
        ),
        LeaseError::Sync(source) => Response::error(
            request_id,
            RpcError::new(LEDGER_UNAVAILABLE, "Ledger unavailable").with_data(json!({
                "operation": source.op().as_str(),
                "reason": error.to_string(),
            })),
        ),
    }
}

fn invalid_params_response(request_id: RequestId, reason: String) -> Response {
    Response::error(
        request_id,
        RpcError::new(INVALID_PARAMS, "Invalid params").with_data(json!({ "reason": reason })),
    )
}
