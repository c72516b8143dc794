//! Handler capability contract.
//!
//! A module claims command kinds with [`OpModule::handles`] and services them
//! with [`OpModule::handle`]. Every call receives a [`Completion`] that must be
//! consumed exactly once; it is `Send`, so a module may finish the request
//! from any thread (typically after hopping onto the tick thread).

use std::fmt;

use serde_json::Value;
use tracing::warn;

use crate::envelope::Payload;
use crate::errors::{self, OpError};

/// Terminal result of one request.
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    /// Success; becomes a `res` payload.
    Respond(Value),
    /// Failure; becomes an `err` with `{code, message}`.
    Fail {
        /// Machine-readable code, e.g. `NOT_ONLINE`.
        code: String,
        /// Human-readable message.
        message: String,
    },
}

type Sink = Box<dyn FnOnce(Outcome) + Send + 'static>;

/// Single-use completion token for one request.
///
/// `respond` and `fail` take `self`, so completing twice does not compile. A
/// token dropped without completing reports `EX` so the client still gets its
/// one terminal reply.
pub struct Completion {
    kind: String,
    sink: Option<Sink>,
}

impl Completion {
    /// Token that hands its outcome to `sink` exactly once.
    pub fn new<F>(kind: impl Into<String>, sink: F) -> Self
    where
        F: FnOnce(Outcome) + Send + 'static,
    {
        Self {
            kind: kind.into(),
            sink: Some(Box::new(sink)),
        }
    }

    /// Kind of the request this token completes.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Complete successfully with `result`.
    pub fn respond(mut self, result: Value) {
        self.finish(Outcome::Respond(result));
    }

    /// Complete with an error code and message.
    pub fn fail(mut self, code: impl Into<String>, message: impl Into<String>) {
        self.finish(Outcome::Fail {
            code: code.into(),
            message: message.into(),
        });
    }

    /// Complete with a handler error, using its code.
    pub fn fail_with(self, err: &OpError) {
        let code = err.code().to_owned();
        self.fail(code, err.to_string());
    }

    /// Complete from a handler result.
    pub fn complete(self, result: Result<Value, OpError>) {
        match result {
            Ok(value) => self.respond(value),
            Err(err) => self.fail_with(&err),
        }
    }

    fn finish(&mut self, outcome: Outcome) {
        if let Some(sink) = self.sink.take() {
            sink(outcome);
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if self.sink.is_none() {
            return;
        }
        let message = if std::thread::panicking() {
            "handler panicked before completing the request"
        } else {
            "handler dropped the request without a response"
        };
        warn!(kind = %self.kind, "{message}");
        self.finish(Outcome::Fail {
            code: errors::EX.to_owned(),
            message: message.to_owned(),
        });
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("kind", &self.kind)
            .field("pending", &self.sink.is_some())
            .finish()
    }
}

/// A domain module servicing a family of command kinds.
pub trait OpModule: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Whether this module services `kind`. Called for every inbound command.
    fn handles(&self, kind: &str) -> bool;

    /// Service one request. Must eventually consume `done`.
    fn handle(&self, kind: &str, payload: Payload, done: Completion);
}
