//! Body-mode resolution.
//!
//! Pure functions mapping a chain's derived body requirements to what the
//! proxy must do with the body in each direction.  The same answer drives
//! the processing-mode override sent to the proxy and the execution
//! context's decision to defer policies until the body arrives.

use crate::chain::PolicyChain;

/// How the proxy handles a message body for one direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BodyMode {
    /// Do not send the body to the kernel.
    Skip,
    /// Accumulate the whole body and send it in one message.
    Buffered,
}

pub fn request_body_mode(chain: &PolicyChain) -> BodyMode {
    if chain.requires_request_body() {
        BodyMode::Buffered
    } else {
        BodyMode::Skip
    }
}

pub fn response_body_mode(chain: &PolicyChain) -> BodyMode {
    if chain.requires_response_body() {
        BodyMode::Buffered
    } else {
        BodyMode::Skip
    }
}
