//! Action translator.
//!
//! Folds a chain's [`ExecutionResult`] into one wire-level mutation and
//! renders phase replies, immediate responses and processing-mode overrides.
//!
//! Folding rules, in chain order (skipped and failed outcomes contribute
//! nothing):
//!
//! - **set**: last writer for a header name wins; a set also discards any
//!   earlier appends for that name.
//! - **append**: values accumulate.
//! - **remove**: accumulated into a removal set applied after everything
//!   else; a removed name is dropped from the sets and appends.
//! - **body**: last replacement wins.  When a body is replaced,
//!   `content-length` is recomputed from its length and overrides any
//!   content-length mutation a policy asked for.
//! - A short-circuit bypasses all of the above and is rendered verbatim.

use crate::proto;
use crate::proto::common_response::ResponseStatus;
use crate::proto::header_value_option::HeaderAppendAction;
use crate::proto::processing_mode::{BodySendMode, HeaderSendMode};
use crate::proto::processing_response::Response as Reply;
use gatehouse_kernel::{
    BodyMode, ExecutionResult, ImmediateResponse, PolicyAction, PolicyChain, request_body_mode,
    response_body_mode,
};

const CONTENT_LENGTH: &str = "content-length";

/// The four processing phases of one exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    RequestHeaders,
    RequestBody,
    ResponseHeaders,
    ResponseBody,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::RequestHeaders => "request_headers",
            Phase::RequestBody => "request_body",
            Phase::ResponseHeaders => "response_headers",
            Phase::ResponseBody => "response_body",
        }
    }

    fn is_headers(self) -> bool {
        matches!(self, Phase::RequestHeaders | Phase::ResponseHeaders)
    }

    fn is_request(self) -> bool {
        matches!(self, Phase::RequestHeaders | Phase::RequestBody)
    }
}

/// Net effect of one phase's policies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergedMutation {
    pub set: Vec<(String, String)>,
    pub append: Vec<(String, String)>,
    pub remove: Vec<String>,
    pub body: Option<Vec<u8>>,
    pub path: Option<String>,
    pub method: Option<String>,
    pub status: Option<u16>,
}

impl MergedMutation {
    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
            && self.append.is_empty()
            && self.remove.is_empty()
            && self.body.is_none()
            && self.path.is_none()
            && self.method.is_none()
            && self.status.is_none()
    }

    fn set_header(&mut self, name: &str, value: &str) {
        self.append.retain(|(n, _)| n != name);
        match self.set.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = value.to_string(),
            None => self.set.push((name.to_string(), value.to_string())),
        }
    }

    fn remove_header(&mut self, name: &str) {
        if !self.remove.iter().any(|n| n == name) {
            self.remove.push(name.to_string());
        }
    }
}

/// Fold every completed `Mutate` action into one mutation.
pub fn merge(result: &ExecutionResult) -> MergedMutation {
    let mut merged = MergedMutation::default();

    for outcome in &result.outcomes {
        if outcome.skipped || outcome.error.is_some() {
            continue;
        }
        let Some(PolicyAction::Mutate(m)) = &outcome.action else {
            continue;
        };
        for (name, value) in &m.headers.set {
            merged.set_header(name, value);
        }
        for (name, value) in &m.headers.append {
            merged.append.push((name.clone(), value.clone()));
        }
        for name in &m.headers.remove {
            merged.remove_header(name);
        }
        if let Some(body) = &m.body {
            merged.body = Some(body.clone());
        }
        if let Some(path) = &m.path {
            merged.path = Some(path.clone());
        }
        if let Some(method) = &m.method {
            merged.method = Some(method.clone());
        }
        if let Some(status) = m.status {
            merged.status = Some(status);
        }
    }

    let removed = std::mem::take(&mut merged.remove);
    merged.set.retain(|(n, _)| !removed.contains(n));
    merged.append.retain(|(n, _)| !removed.contains(n));
    merged.remove = removed;

    if let Some(len) = merged.body.as_ref().map(Vec::len) {
        let not_length = |n: &str| !n.eq_ignore_ascii_case(CONTENT_LENGTH);
        merged.set.retain(|(n, _)| not_length(n));
        merged.append.retain(|(n, _)| not_length(n));
        merged.remove.retain(|n| not_length(n));
        merged.set.push((CONTENT_LENGTH.to_string(), len.to_string()));
    }

    merged
}

fn header_option(name: &str, value: &str, action: HeaderAppendAction) -> proto::HeaderValueOption {
    proto::HeaderValueOption {
        header: Some(proto::HeaderValue {
            key: name.to_string(),
            value: value.to_string(),
            raw_value: Vec::new(),
        }),
        append_action: action as i32,
    }
}

/// Render a merged mutation for `phase`.
pub fn common_response(phase: Phase, merged: &MergedMutation) -> proto::CommonResponse {
    let mut set_headers = Vec::new();
    let overwrite = HeaderAppendAction::OverwriteIfExistsOrAdd;

    if phase.is_request() {
        if let Some(path) = &merged.path {
            set_headers.push(header_option(":path", path, overwrite));
        }
        if let Some(method) = &merged.method {
            set_headers.push(header_option(":method", method, overwrite));
        }
    } else if let Some(status) = merged.status {
        set_headers.push(header_option(":status", &status.to_string(), overwrite));
    }
    for (name, value) in &merged.set {
        set_headers.push(header_option(name, value, overwrite));
    }
    for (name, value) in &merged.append {
        set_headers.push(header_option(
            name,
            value,
            HeaderAppendAction::AppendIfExistsOrAdd,
        ));
    }

    let header_mutation = (!set_headers.is_empty() || !merged.remove.is_empty()).then(|| {
        proto::HeaderMutation {
            set_headers,
            remove_headers: merged.remove.clone(),
        }
    });
    let body_mutation = merged.body.as_ref().map(|body| proto::BodyMutation {
        mutation: Some(proto::body_mutation::Mutation::Body(body.clone())),
    });
    let status = if phase.is_headers() && body_mutation.is_some() {
        ResponseStatus::ContinueAndReplace
    } else {
        ResponseStatus::Continue
    };

    proto::CommonResponse {
        status: status as i32,
        header_mutation,
        body_mutation,
    }
}

/// Wrap a common response in the reply slot for `phase`.
pub fn phase_reply(
    phase: Phase,
    common: proto::CommonResponse,
    mode_override: Option<proto::ProcessingMode>,
) -> proto::ProcessingResponse {
    let response = Some(common);
    let reply = match phase {
        Phase::RequestHeaders => Reply::RequestHeaders(proto::HeadersResponse { response }),
        Phase::ResponseHeaders => Reply::ResponseHeaders(proto::HeadersResponse { response }),
        Phase::RequestBody => Reply::RequestBody(proto::BodyResponse { response }),
        Phase::ResponseBody => Reply::ResponseBody(proto::BodyResponse { response }),
    };
    proto::ProcessingResponse {
        response: Some(reply),
        mode_override,
    }
}

/// Unmodified continue for `phase`.
pub fn pass_through(phase: Phase) -> proto::ProcessingResponse {
    phase_reply(phase, proto::CommonResponse::default(), None)
}

/// Unmodified continue carrying a mode override.
pub fn pass_through_with_mode(
    phase: Phase,
    mode: proto::ProcessingMode,
) -> proto::ProcessingResponse {
    phase_reply(phase, proto::CommonResponse::default(), Some(mode))
}

/// Terminal response, rendered verbatim.
pub fn immediate(resp: &ImmediateResponse) -> proto::ProcessingResponse {
    let headers = (!resp.headers.is_empty()).then(|| proto::HeaderMutation {
        set_headers: resp
            .headers
            .iter()
            .map(|(n, v)| header_option(n, v, HeaderAppendAction::AppendIfExistsOrAdd))
            .collect(),
        remove_headers: Vec::new(),
    });
    proto::ProcessingResponse {
        response: Some(Reply::ImmediateResponse(proto::ImmediateResponse {
            status: Some(proto::HttpStatus {
                code: u32::from(resp.status),
            }),
            headers,
            body: resp.body.clone(),
            details: resp.details.clone().unwrap_or_default(),
        })),
        mode_override: None,
    }
}

/// Render a phase's execution result.
///
/// A short-circuit wins over everything; otherwise the merged mutation is
/// rendered into the phase's reply slot.  Errors are the caller's concern.
pub fn translate(
    phase: Phase,
    result: &ExecutionResult,
    mode_override: Option<proto::ProcessingMode>,
) -> proto::ProcessingResponse {
    if let Some(resp) = &result.final_action {
        return immediate(resp);
    }
    phase_reply(phase, common_response(phase, &merge(result)), mode_override)
}

/// The 500 sent when a request-phase policy fails.
pub fn policy_failure(message: &str) -> ImmediateResponse {
    ImmediateResponse::json_error(500, "POLICY_EXECUTION_FAILED", message)
}

fn body_send_mode(mode: BodyMode, end_of_stream: bool) -> BodySendMode {
    match mode {
        BodyMode::Buffered if !end_of_stream => BodySendMode::Buffered,
        _ => BodySendMode::None,
    }
}

/// Mode override sent with the request-headers reply.
///
/// Response headers are only requested when the chain has response
/// policies.  A request that already ended with its headers has no body to
/// buffer.
pub fn request_mode(chain: &PolicyChain, request_end_of_stream: bool) -> proto::ProcessingMode {
    let response_header_mode = if chain.has_response_policies() {
        HeaderSendMode::Send
    } else {
        HeaderSendMode::Skip
    };
    proto::ProcessingMode {
        request_header_mode: HeaderSendMode::Default as i32,
        response_header_mode: response_header_mode as i32,
        request_body_mode: body_send_mode(request_body_mode(chain), request_end_of_stream) as i32,
        response_body_mode: body_send_mode(response_body_mode(chain), false) as i32,
    }
}

/// Mode override sent with the response-headers reply.
pub fn response_mode(chain: &PolicyChain, response_end_of_stream: bool) -> proto::ProcessingMode {
    proto::ProcessingMode {
        request_header_mode: HeaderSendMode::Default as i32,
        response_header_mode: HeaderSendMode::Default as i32,
        request_body_mode: BodySendMode::None as i32,
        response_body_mode: body_send_mode(response_body_mode(chain), response_end_of_stream)
            as i32,
    }
}

/// Mode override for a stream with no chain: nothing further is needed.
pub fn bypass_mode() -> proto::ProcessingMode {
    proto::ProcessingMode {
        request_header_mode: HeaderSendMode::Default as i32,
        response_header_mode: HeaderSendMode::Skip as i32,
        request_body_mode: BodySendMode::None as i32,
        response_body_mode: BodySendMode::None as i32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatehouse_kernel::{Mutations, PolicyError, PolicyOutcome};

    fn result(actions: Vec<Mutations>) -> ExecutionResult {
        ExecutionResult {
            outcomes: actions
                .into_iter()
                .enumerate()
                .map(|(i, m)| {
                    PolicyOutcome::completed(format!("p{i}"), "v1", PolicyAction::Mutate(m))
                })
                .collect(),
            ..Default::default()
        }
    }

    fn headers_of(common: &proto::CommonResponse) -> Vec<(String, String, HeaderAppendAction)> {
        common
            .header_mutation
            .as_ref()
            .map(|m| {
                m.set_headers
                    .iter()
                    .map(|o| {
                        let h = o.header.clone().unwrap_or_default();
                        (h.key, h.value, o.append_action())
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    #[test]
    fn last_set_wins() {
        let merged = merge(&result(vec![
            Mutations::new().set_header("x", "a"),
            Mutations::new().set_header("x", "b"),
        ]));
        assert_eq!(merged.set, vec![("x".to_string(), "b".to_string())]);
    }

    #[test]
    fn appends_accumulate() {
        let merged = merge(&result(vec![
            Mutations::new().append_header("y", "1"),
            Mutations::new().append_header("y", "2"),
        ]));
        assert_eq!(
            merged.append,
            vec![
                ("y".to_string(), "1".to_string()),
                ("y".to_string(), "2".to_string())
            ]
        );
    }

    #[test]
    fn set_after_append_discards_earlier_appends() {
        let merged = merge(&result(vec![
            Mutations::new().append_header("y", "1"),
            Mutations::new().set_header("y", "2"),
            Mutations::new().append_header("y", "3"),
        ]));
        assert_eq!(merged.set, vec![("y".to_string(), "2".to_string())]);
        assert_eq!(merged.append, vec![("y".to_string(), "3".to_string())]);
    }

    #[test]
    fn removals_apply_last() {
        let merged = merge(&result(vec![
            Mutations::new().remove_header("z"),
            Mutations::new().set_header("z", "late").append_header("z", "more"),
        ]));
        assert!(merged.set.is_empty());
        assert!(merged.append.is_empty());
        assert_eq!(merged.remove, vec!["z".to_string()]);
    }

    #[test]
    fn skipped_and_failed_outcomes_contribute_nothing() {
        let mut r = result(vec![Mutations::new().set_header("keep", "1")]);
        r.outcomes.push(PolicyOutcome::skipped("s", "v1"));
        r.outcomes.push(PolicyOutcome::failed(
            "f",
            "v1",
            PolicyError::Failed("x".into()),
        ));
        let merged = merge(&r);
        assert_eq!(merged.set, vec![("keep".to_string(), "1".to_string())]);
    }

    #[test]
    fn replaced_body_recomputes_content_length() {
        let merged = merge(&result(vec![
            Mutations::new()
                .set_header("content-length", "999")
                .append_header("Content-Length", "1"),
            Mutations::new().replace_body("pong!"),
            Mutations::new().remove_header("content-length"),
        ]));
        assert_eq!(
            merged.set,
            vec![("content-length".to_string(), "5".to_string())]
        );
        assert!(merged.append.is_empty());
        assert!(merged.remove.is_empty());
        assert_eq!(merged.body.as_deref(), Some(&b"pong!"[..]));
    }

    #[test]
    fn untouched_content_length_without_body() {
        let merged = merge(&result(vec![
            Mutations::new().set_header("content-length", "12"),
        ]));
        assert_eq!(
            merged.set,
            vec![("content-length".to_string(), "12".to_string())]
        );
    }

    #[test]
    fn rendering_uses_append_actions() {
        let merged = merge(&result(vec![
            Mutations::new()
                .set_header("x", "1")
                .append_header("y", "2")
                .rewrite_path("/v2"),
        ]));
        let common = common_response(Phase::RequestHeaders, &merged);
        assert_eq!(
            headers_of(&common),
            vec![
                (
                    ":path".to_string(),
                    "/v2".to_string(),
                    HeaderAppendAction::OverwriteIfExistsOrAdd
                ),
                (
                    "x".to_string(),
                    "1".to_string(),
                    HeaderAppendAction::OverwriteIfExistsOrAdd
                ),
                (
                    "y".to_string(),
                    "2".to_string(),
                    HeaderAppendAction::AppendIfExistsOrAdd
                ),
            ]
        );
        assert_eq!(common.status(), ResponseStatus::Continue);
        assert!(common.body_mutation.is_none());
    }

    #[test]
    fn status_override_only_on_response_side() {
        let merged = MergedMutation {
            status: Some(418),
            ..Default::default()
        };
        let req = common_response(Phase::RequestBody, &merged);
        assert!(req.header_mutation.is_none());
        let resp = common_response(Phase::ResponseHeaders, &merged);
        assert_eq!(headers_of(&resp)[0].0, ":status");
        assert_eq!(headers_of(&resp)[0].1, "418");
    }

    #[test]
    fn body_replacement_in_headers_phase_continues_and_replaces() {
        let merged = merge(&result(vec![Mutations::new().replace_body("x")]));
        let headers = common_response(Phase::ResponseHeaders, &merged);
        assert_eq!(headers.status(), ResponseStatus::ContinueAndReplace);
        let body = common_response(Phase::ResponseBody, &merged);
        assert_eq!(body.status(), ResponseStatus::Continue);
        assert!(matches!(
            body.body_mutation.and_then(|m| m.mutation),
            Some(proto::body_mutation::Mutation::Body(ref b)) if b == b"x"
        ));
    }

    #[test]
    fn short_circuit_is_rendered_verbatim() {
        let resp = ImmediateResponse::new(401)
            .with_header("www-authenticate", "Bearer")
            .with_body("nope")
            .with_details("auth");
        let r = ExecutionResult {
            outcomes: vec![PolicyOutcome::completed(
                "auth",
                "v1",
                PolicyAction::ImmediateResponse(resp.clone()),
            )],
            short_circuited: true,
            final_action: Some(resp),
        };
        let reply = translate(Phase::RequestHeaders, &r, Some(bypass_mode()));
        assert!(reply.mode_override.is_none());
        let Some(Reply::ImmediateResponse(imm)) = reply.response else {
            panic!("expected immediate response");
        };
        assert_eq!(imm.status.map(|s| s.code), Some(401));
        assert_eq!(imm.body, b"nope");
        assert_eq!(imm.details, "auth");
        assert_eq!(imm.headers.unwrap().set_headers.len(), 1);
    }

    #[test]
    fn policy_failure_is_json_500() {
        let resp = policy_failure("boom");
        assert_eq!(resp.status, 500);
        let body: serde_json::Value = serde_json::from_slice(&resp.body).unwrap();
        assert_eq!(body["error"]["code"], "POLICY_EXECUTION_FAILED");
        assert_eq!(body["error"]["message"], "boom");
    }

    #[test]
    fn bypass_skips_everything_after_request_headers() {
        let mode = bypass_mode();
        assert_eq!(mode.response_header_mode(), HeaderSendMode::Skip);
        assert_eq!(mode.request_body_mode(), BodySendMode::None);
        assert_eq!(mode.response_body_mode(), BodySendMode::None);
    }
}
