//! Execution context: the per-exchange state machine.
//!
//! ```text
//!  start ──▶ RequestBody ──▶ AwaitingResponse ──▶ ResponseBody ──▶ Done
//!    │        (buffering)        ▲      │          (buffering)      ▲
//!    └───────────────────────────┘      └───────────────────────────┘
//!          body not required                 body not required
//!
//!  any phase ── immediate response ──▶ Terminated
//! ```
//!
//! The context is owned by its stream's task and only moves forward when a
//! phase message arrives.  A message that does not fit the current state is
//! answered with a pass-through and changes nothing.

use crate::proto;
use crate::translate::{self, Phase};
use gatehouse_kernel::{
    Body, ChainExecutor, ExecutionResult, PolicyChain, RequestContext, ResponseContext,
};
use std::sync::Arc;
use tracing::{debug, error, warn};

enum State {
    /// Request body is being accumulated; request policies have not run.
    RequestBody {
        request: RequestContext,
        buffered: Vec<u8>,
    },
    /// Request phase finished; waiting for response headers.
    AwaitingResponse { request: RequestContext },
    /// Response body is being accumulated; response policies have not run.
    ResponseBody {
        response: ResponseContext,
        buffered: Vec<u8>,
    },
    /// Response phase finished.
    Done,
    /// An immediate response ended the exchange.
    Terminated,
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            State::RequestBody { .. } => "request_body",
            State::AwaitingResponse { .. } => "awaiting_response",
            State::ResponseBody { .. } => "response_body",
            State::Done => "done",
            State::Terminated => "terminated",
        }
    }
}

/// One request/response cycle against a resolved chain.
pub struct ExecutionContext {
    request_id: String,
    chain: Arc<PolicyChain>,
    executor: Arc<dyn ChainExecutor>,
    state: State,
}

impl ExecutionContext {
    /// Handle the request-headers phase and create the context.
    pub async fn start(
        request_id: String,
        route_key: String,
        chain: Arc<PolicyChain>,
        executor: Arc<dyn ChainExecutor>,
        headers: &[(String, String)],
        end_of_stream: bool,
    ) -> (Self, proto::ProcessingResponse) {
        let request = RequestContext::from_raw_headers(
            request_id.clone(),
            route_key,
            headers.iter().map(|(k, v)| (k.as_str(), v.as_str())),
        );
        let mode = translate::request_mode(&chain, end_of_stream);
        let mut ctx = Self {
            request_id,
            chain,
            executor,
            state: State::Done,
        };

        if ctx.chain.requires_request_body() {
            if !end_of_stream {
                debug!(request_id = %ctx.request_id, "deferring request policies until body");
                ctx.state = State::RequestBody {
                    request,
                    buffered: Vec::new(),
                };
                return (ctx, translate::pass_through_with_mode(Phase::RequestHeaders, mode));
            }
            let request = request.with_body(Body::new(Vec::new(), true));
            let reply = ctx.run_request(Phase::RequestHeaders, request, Some(mode)).await;
            return (ctx, reply);
        }

        let reply = ctx.run_request(Phase::RequestHeaders, request, Some(mode)).await;
        (ctx, reply)
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn chain(&self) -> &Arc<PolicyChain> {
        &self.chain
    }

    /// Name of the current state, for logging.
    pub fn state_name(&self) -> &'static str {
        self.state.name()
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, State::Done | State::Terminated)
    }

    pub async fn on_request_body(
        &mut self,
        chunk: &[u8],
        end_of_stream: bool,
    ) -> proto::ProcessingResponse {
        match std::mem::replace(&mut self.state, State::Terminated) {
            State::RequestBody {
                request,
                mut buffered,
            } => {
                buffered.extend_from_slice(chunk);
                if !end_of_stream {
                    self.state = State::RequestBody { request, buffered };
                    return translate::pass_through(Phase::RequestBody);
                }
                let request = request.with_body(Body::new(buffered, true));
                self.run_request(Phase::RequestBody, request, None).await
            }
            other => self.out_of_order(other, Phase::RequestBody),
        }
    }

    pub async fn on_response_headers(
        &mut self,
        headers: &[(String, String)],
        end_of_stream: bool,
    ) -> proto::ProcessingResponse {
        match std::mem::replace(&mut self.state, State::Terminated) {
            State::AwaitingResponse { request } => {
                let response = ResponseContext::from_request(
                    request,
                    headers.iter().map(|(k, v)| (k.as_str(), v.as_str())),
                );
                if !self.chain.has_response_policies() {
                    self.state = State::Done;
                    return translate::pass_through(Phase::ResponseHeaders);
                }
                let mode = translate::response_mode(&self.chain, end_of_stream);
                if self.chain.requires_response_body() {
                    if !end_of_stream {
                        debug!(request_id = %self.request_id, "deferring response policies until body");
                        self.state = State::ResponseBody {
                            response,
                            buffered: Vec::new(),
                        };
                        return translate::pass_through_with_mode(Phase::ResponseHeaders, mode);
                    }
                    let response = response.with_body(Body::new(Vec::new(), true));
                    return self
                        .run_response(Phase::ResponseHeaders, response, Some(mode))
                        .await;
                }
                self.run_response(Phase::ResponseHeaders, response, Some(mode))
                    .await
            }
            other => self.out_of_order(other, Phase::ResponseHeaders),
        }
    }

    pub async fn on_response_body(
        &mut self,
        chunk: &[u8],
        end_of_stream: bool,
    ) -> proto::ProcessingResponse {
        match std::mem::replace(&mut self.state, State::Terminated) {
            State::ResponseBody {
                response,
                mut buffered,
            } => {
                buffered.extend_from_slice(chunk);
                if !end_of_stream {
                    self.state = State::ResponseBody { response, buffered };
                    return translate::pass_through(Phase::ResponseBody);
                }
                let response = response.with_body(Body::new(buffered, true));
                self.run_response(Phase::ResponseBody, response, None).await
            }
            other => self.out_of_order(other, Phase::ResponseBody),
        }
    }

    fn out_of_order(&mut self, state: State, phase: Phase) -> proto::ProcessingResponse {
        if !matches!(state, State::Terminated) {
            debug!(
                request_id = %self.request_id,
                state = state.name(),
                phase = phase.as_str(),
                "message does not fit current state, passing through"
            );
        }
        self.state = state;
        translate::pass_through(phase)
    }

    /// Run the request policies.  Failures are fatal to the exchange.
    async fn run_request(
        &mut self,
        phase: Phase,
        mut request: RequestContext,
        mode: Option<proto::ProcessingMode>,
    ) -> proto::ProcessingResponse {
        let result = self
            .executor
            .execute_request_policies(self.chain.request_policies(), &mut request)
            .await;

        if let Some((outcome, err)) = result.first_error() {
            error!(
                request_id = %self.request_id,
                policy = %outcome.name,
                phase = phase.as_str(),
                error = %err,
                "request policy failed, rejecting request"
            );
            self.state = State::Terminated;
            return translate::immediate(&translate::policy_failure(&err.to_string()));
        }
        self.finish(phase, result, mode, State::AwaitingResponse { request })
    }

    /// Run the response policies.  Failures forward the response unmodified.
    async fn run_response(
        &mut self,
        phase: Phase,
        mut response: ResponseContext,
        mode: Option<proto::ProcessingMode>,
    ) -> proto::ProcessingResponse {
        let result = self
            .executor
            .execute_response_policies(self.chain.response_policies(), &mut response)
            .await;

        if let Some((outcome, err)) = result.first_error() {
            warn!(
                request_id = %self.request_id,
                policy = %outcome.name,
                phase = phase.as_str(),
                error = %err,
                "response policy failed, forwarding response unmodified"
            );
            self.state = State::Done;
            return translate::phase_reply(phase, proto::CommonResponse::default(), mode);
        }
        self.finish(phase, result, mode, State::Done)
    }

    fn finish(
        &mut self,
        phase: Phase,
        result: ExecutionResult,
        mode: Option<proto::ProcessingMode>,
        next: State,
    ) -> proto::ProcessingResponse {
        self.state = if result.short_circuited {
            debug!(request_id = %self.request_id, phase = phase.as_str(), "exchange short-circuited");
            State::Terminated
        } else {
            next
        };
        translate::translate(phase, &result, mode)
    }
}
