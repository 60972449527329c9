//! Protocol handler: the `ExternalProcessor` gRPC service.
//!
//! One bidirectional stream carries one HTTP exchange.  Each stream gets its
//! own task owning a [`StreamProcessor`], which answers every inbound
//! message with exactly one reply, in order, before reading the next.  A
//! message with no phase set has no valid reply, so the stream is closed
//! with `INVALID_ARGUMENT` instead.

use crate::context::ExecutionContext;
use crate::proto::external_processor_server::ExternalProcessor;
use crate::proto::processing_request::Request as Phase;
use crate::proto::{self, HeaderMap, ProcessingRequest, ProcessingResponse};
use crate::registry::RouteRegistry;
use crate::translate;
use gatehouse_kernel::ChainExecutor;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};
use tracing::{Instrument, Span, debug, info_span, warn};
use uuid::Uuid;

pub const DEFAULT_ROUTE_NAMESPACE: &str = "gatehouse.route";
pub const DEFAULT_ROUTE_KEY: &str = "route_name";
pub const FALLBACK_ROUTE_ATTRIBUTE: &str = "xds.route_name";

/// Where the proxy puts the route key.
#[derive(Debug, Clone)]
pub struct RouteKeyLocator {
    namespace: String,
    key: String,
    fallback_attribute: String,
}

impl Default for RouteKeyLocator {
    fn default() -> Self {
        Self::new(DEFAULT_ROUTE_NAMESPACE, DEFAULT_ROUTE_KEY)
    }
}

impl RouteKeyLocator {
    pub fn new(namespace: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            key: key.into(),
            fallback_attribute: FALLBACK_ROUTE_ATTRIBUTE.to_string(),
        }
    }

    /// Filter metadata first, then the fallback attribute.  Empty values
    /// count as absent.
    pub fn locate(
        &self,
        metadata: Option<&proto::MetadataContext>,
        attributes: &HashMap<String, String>,
    ) -> Option<String> {
        metadata
            .and_then(|m| m.filter_metadata.get(&self.namespace))
            .and_then(|f| f.fields.get(&self.key))
            .filter(|v| !v.is_empty())
            .or_else(|| {
                attributes
                    .get(&self.fallback_attribute)
                    .filter(|v| !v.is_empty())
            })
            .cloned()
    }
}

/// Header pairs as received; `raw_value` wins over `value` when set.
fn header_pairs(map: Option<&HeaderMap>) -> Vec<(String, String)> {
    map.map(|m| {
        m.headers
            .iter()
            .map(|h| {
                let value = if h.raw_value.is_empty() {
                    h.value.clone()
                } else {
                    String::from_utf8_lossy(&h.raw_value).into_owned()
                };
                (h.key.clone(), value)
            })
            .collect()
    })
    .unwrap_or_default()
}

enum StreamState {
    AwaitingRequestHeaders,
    /// No chain for this route: everything passes through untouched.
    Bypass,
    Active(ExecutionContext),
}

/// Per-stream dispatcher.
pub struct StreamProcessor {
    routes: Arc<RouteRegistry>,
    executor: Arc<dyn ChainExecutor>,
    locator: Arc<RouteKeyLocator>,
    state: StreamState,
}

impl StreamProcessor {
    pub fn new(
        routes: Arc<RouteRegistry>,
        executor: Arc<dyn ChainExecutor>,
        locator: Arc<RouteKeyLocator>,
    ) -> Self {
        Self {
            routes,
            executor,
            locator,
            state: StreamState::AwaitingRequestHeaders,
        }
    }

    pub fn is_bypassed(&self) -> bool {
        matches!(self.state, StreamState::Bypass)
    }

    pub fn execution(&self) -> Option<&ExecutionContext> {
        match &self.state {
            StreamState::Active(ctx) => Some(ctx),
            _ => None,
        }
    }

    /// Answer one inbound message.  Fails only for a message with no phase.
    pub async fn handle(&mut self, message: ProcessingRequest) -> Result<ProcessingResponse, Status> {
        let Some(phase) = message.request else {
            return Err(Status::invalid_argument("processing request carries no phase"));
        };

        let phase = match phase {
            Phase::RequestHeaders(headers)
                if matches!(self.state, StreamState::AwaitingRequestHeaders) =>
            {
                let route_key = self
                    .locator
                    .locate(message.metadata_context.as_ref(), &message.attributes);
                return Ok(self.begin(route_key, headers).await);
            }
            other => other,
        };

        let reply = match (&mut self.state, phase) {
            (StreamState::Active(ctx), Phase::RequestBody(body)) => {
                ctx.on_request_body(&body.body, body.end_of_stream).await
            }
            (StreamState::Active(ctx), Phase::ResponseHeaders(headers)) => {
                let pairs = header_pairs(headers.headers.as_ref());
                ctx.on_response_headers(&pairs, headers.end_of_stream).await
            }
            (StreamState::Active(ctx), Phase::ResponseBody(body)) => {
                ctx.on_response_body(&body.body, body.end_of_stream).await
            }
            (StreamState::Bypass, phase) => translate::pass_through(phase_of(&phase)),
            (_, phase) => {
                debug!(phase = phase_of(&phase).as_str(), "unexpected message for stream state, passing through");
                translate::pass_through(phase_of(&phase))
            }
        };
        Ok(reply)
    }

    async fn begin(
        &mut self,
        route_key: Option<String>,
        headers: proto::HttpHeaders,
    ) -> ProcessingResponse {
        let chain = route_key
            .as_deref()
            .and_then(|key| self.routes.lookup(key));
        let (Some(route_key), Some(chain)) = (route_key, chain) else {
            debug!("no policy chain for stream, bypassing");
            self.state = StreamState::Bypass;
            return translate::pass_through_with_mode(
                translate::Phase::RequestHeaders,
                translate::bypass_mode(),
            );
        };

        let request_id = Uuid::new_v4().to_string();
        let span = Span::current();
        span.record("request_id", request_id.as_str());
        span.record("route_key", route_key.as_str());
        debug!(
            request_policies = chain.request_policies().len(),
            response_policies = chain.response_policies().len(),
            "policy chain resolved"
        );

        let pairs = header_pairs(headers.headers.as_ref());
        let (ctx, reply) = ExecutionContext::start(
            request_id,
            route_key,
            chain,
            Arc::clone(&self.executor),
            &pairs,
            headers.end_of_stream,
        )
        .await;
        self.state = StreamState::Active(ctx);
        reply
    }
}

fn phase_of(phase: &Phase) -> translate::Phase {
    match phase {
        Phase::RequestHeaders(_) => translate::Phase::RequestHeaders,
        Phase::RequestBody(_) => translate::Phase::RequestBody,
        Phase::ResponseHeaders(_) => translate::Phase::ResponseHeaders,
        Phase::ResponseBody(_) => translate::Phase::ResponseBody,
    }
}

/// The gRPC service.  Cheap to clone; all state is behind `Arc`s.
#[derive(Clone)]
pub struct ExtProcService {
    routes: Arc<RouteRegistry>,
    executor: Arc<dyn ChainExecutor>,
    locator: Arc<RouteKeyLocator>,
}

impl ExtProcService {
    pub fn new(routes: Arc<RouteRegistry>, executor: Arc<dyn ChainExecutor>) -> Self {
        Self {
            routes,
            executor,
            locator: Arc::new(RouteKeyLocator::default()),
        }
    }

    pub fn with_locator(mut self, locator: RouteKeyLocator) -> Self {
        self.locator = Arc::new(locator);
        self
    }

    fn processor(&self) -> StreamProcessor {
        StreamProcessor::new(
            Arc::clone(&self.routes),
            Arc::clone(&self.executor),
            Arc::clone(&self.locator),
        )
    }
}

#[tonic::async_trait]
impl ExternalProcessor for ExtProcService {
    type ProcessStream = ReceiverStream<Result<ProcessingResponse, Status>>;

    async fn process(
        &self,
        request: Request<Streaming<ProcessingRequest>>,
    ) -> Result<Response<Self::ProcessStream>, Status> {
        let mut inbound = request.into_inner();
        let mut processor = self.processor();
        let (tx, rx) = mpsc::channel(4);

        let span = info_span!(
            "ext_proc",
            request_id = tracing::field::Empty,
            route_key = tracing::field::Empty
        );
        tokio::spawn(
            async move {
                loop {
                    match inbound.message().await {
                        Ok(Some(message)) => match processor.handle(message).await {
                            Ok(reply) => {
                                if tx.send(Ok(reply)).await.is_err() {
                                    debug!("proxy went away before reply was sent");
                                    break;
                                }
                            }
                            Err(status) => {
                                warn!(error = status.message(), "closing stream on malformed message");
                                let _ = tx.send(Err(status)).await;
                                break;
                            }
                        },
                        Ok(None) => break,
                        Err(status) => {
                            debug!(code = ?status.code(), message = status.message(), "inbound stream error");
                            break;
                        }
                    }
                }
                debug!("stream closed");
            }
            .instrument(span),
        );

        Ok(Response::new(ReceiverStream::new(rx)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::SequentialChainExecutor;
    use crate::proto::processing_response::Response as Reply;
    use async_trait::async_trait;
    use gatehouse_kernel::{
        PolicyAction, PolicyChain, PolicyError, PolicyImpl, PolicyParams, PolicySpec,
        RequestContext, RequestPolicy,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting(AtomicUsize);

    #[async_trait]
    impl RequestPolicy for Counting {
        async fn on_request(
            &self,
            _ctx: &mut RequestContext,
            _params: &PolicyParams,
        ) -> Result<PolicyAction, PolicyError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(PolicyAction::Continue)
        }
    }

    fn processor(routes: Arc<RouteRegistry>) -> StreamProcessor {
        StreamProcessor::new(
            routes,
            Arc::new(SequentialChainExecutor::new()),
            Arc::new(RouteKeyLocator::default()),
        )
    }

    fn headers_message(route: Option<&str>) -> ProcessingRequest {
        let mut metadata = proto::MetadataContext::default();
        if let Some(route) = route {
            metadata.filter_metadata.insert(
                DEFAULT_ROUTE_NAMESPACE.into(),
                proto::FilterMetadata {
                    fields: HashMap::from([(DEFAULT_ROUTE_KEY.to_string(), route.to_string())]),
                },
            );
        }
        ProcessingRequest {
            request: Some(Phase::RequestHeaders(proto::HttpHeaders {
                headers: Some(HeaderMap {
                    headers: vec![proto::HeaderValue {
                        key: ":path".into(),
                        value: "/".into(),
                        raw_value: Vec::new(),
                    }],
                }),
                end_of_stream: false,
            })),
            metadata_context: Some(metadata),
            attributes: HashMap::new(),
        }
    }

    fn body_message(body: &[u8]) -> ProcessingRequest {
        ProcessingRequest {
            request: Some(Phase::RequestBody(proto::HttpBody {
                body: body.to_vec(),
                end_of_stream: true,
            })),
            ..Default::default()
        }
    }

    fn response_headers_message() -> ProcessingRequest {
        ProcessingRequest {
            request: Some(Phase::ResponseHeaders(proto::HttpHeaders {
                headers: Some(HeaderMap::default()),
                end_of_stream: true,
            })),
            ..Default::default()
        }
    }

    fn routed(counter: Arc<Counting>) -> Arc<RouteRegistry> {
        let routes = Arc::new(RouteRegistry::new());
        routes.register(
            "orders",
            Arc::new(PolicyChain::build(vec![(
                PolicySpec::new("count", "v1"),
                PolicyImpl::new("count", "v1").with_request(counter),
            )])),
        );
        routes
    }

    fn is_pass_through(reply: &ProcessingResponse) -> bool {
        let common = match reply.response.as_ref() {
            Some(Reply::RequestHeaders(h)) | Some(Reply::ResponseHeaders(h)) => h.response.clone(),
            Some(Reply::RequestBody(b)) | Some(Reply::ResponseBody(b)) => b.response.clone(),
            _ => return false,
        }
        .unwrap_or_default();
        common.header_mutation.is_none() && common.body_mutation.is_none()
    }

    #[test]
    fn locator_prefers_metadata_then_attribute() {
        let locator = RouteKeyLocator::default();
        let attrs = HashMap::from([(FALLBACK_ROUTE_ATTRIBUTE.to_string(), "from-attr".to_string())]);
        assert_eq!(locator.locate(None, &attrs).as_deref(), Some("from-attr"));

        let md = headers_message(Some("from-md")).metadata_context;
        assert_eq!(
            locator.locate(md.as_ref(), &attrs).as_deref(),
            Some("from-md")
        );

        let empty = headers_message(Some("")).metadata_context;
        assert_eq!(locator.locate(empty.as_ref(), &HashMap::new()), None);
    }

    #[tokio::test]
    async fn unknown_route_bypasses_every_phase() {
        let counter = Arc::new(Counting(AtomicUsize::new(0)));
        let mut p = processor(routed(counter.clone()));

        let reply = p.handle(headers_message(Some("unknown"))).await.unwrap();
        assert!(p.is_bypassed());
        let mode = reply.mode_override.clone().expect("bypass mode override");
        assert_eq!(
            mode.response_header_mode(),
            proto::processing_mode::HeaderSendMode::Skip
        );
        assert!(is_pass_through(&reply));

        for message in [body_message(b"x"), response_headers_message(), headers_message(Some("orders"))] {
            let reply = p.handle(message).await.unwrap();
            assert!(is_pass_through(&reply));
            assert!(reply.mode_override.is_none());
        }
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_route_key_bypasses() {
        let counter = Arc::new(Counting(AtomicUsize::new(0)));
        let mut p = processor(routed(counter.clone()));
        p.handle(headers_message(None)).await.unwrap();
        assert!(p.is_bypassed());
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn body_before_headers_is_inert() {
        let counter = Arc::new(Counting(AtomicUsize::new(0)));
        let mut p = processor(routed(counter.clone()));
        let reply = p.handle(body_message(b"early")).await.unwrap();
        assert!(matches!(reply.response, Some(Reply::RequestBody(_))));
        assert!(is_pass_through(&reply));

        p.handle(headers_message(Some("orders"))).await.unwrap();
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        assert!(p.execution().is_some());
    }

    #[tokio::test]
    async fn message_without_phase_is_rejected() {
        let counter = Arc::new(Counting(AtomicUsize::new(0)));
        let mut p = processor(routed(counter.clone()));
        let status = p.handle(ProcessingRequest::default()).await.unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);

        // The processor itself is left untouched.
        p.handle(headers_message(Some("orders"))).await.unwrap();
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }
}
