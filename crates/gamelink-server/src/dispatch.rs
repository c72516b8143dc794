//! Routing of `cmd` envelopes to handler modules.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use gamelink_core::envelope::{into_payload, Envelope};
use gamelink_core::errors::{BAD_REQUEST, UNKNOWN_KIND};
use gamelink_core::ids::RequestId;
use gamelink_core::tick::panic_message;
use gamelink_core::{Completion, OpModule, Outcome};
use gamelink_telemetry::names;
use metrics::counter;
use tracing::{debug, warn};

use crate::session::{ReplySlot, Session};

/// Ordered list of handler modules. The first whose `handles` returns true
/// for a kind owns it.
pub struct DispatchRouter {
    modules: Vec<Arc<dyn OpModule>>,
}

impl DispatchRouter {
    /// Router over `modules`, consulted in order.
    pub fn new(modules: Vec<Arc<dyn OpModule>>) -> Self {
        Self { modules }
    }

    /// Module names in routing order.
    pub fn module_names(&self) -> Vec<&str> {
        self.modules.iter().map(|m| m.name()).collect()
    }

    fn find(&self, kind: &str) -> Option<&Arc<dyn OpModule>> {
        self.modules.iter().find(|m| m.handles(kind))
    }

    /// Route one `cmd` from `session`.
    ///
    /// Exactly one `res` or `err` carrying the request id goes back to the
    /// originating session through `slot`, whichever thread the module
    /// completes on. A missing id is replaced with a generated one.
    pub fn route(&self, session: &Arc<Session>, slot: ReplySlot, mut envelope: Envelope) {
        let id = envelope
            .id
            .take()
            .unwrap_or_else(|| RequestId::new().into_string());

        let Some(kind) = envelope.kind.take() else {
            let _ = slot.send(&Envelope::err(id, None, BAD_REQUEST, "missing kind"));
            return;
        };

        let Some(module) = self.find(&kind) else {
            counter!(names::UNKNOWN_KIND_TOTAL).increment(1);
            debug!(session_id = %session.id(), kind, "no module claims kind");
            let message = format!("no handler for {kind}");
            let _ = slot.send(&Envelope::err(id, Some(kind), UNKNOWN_KIND, message));
            return;
        };

        counter!(names::COMMANDS_TOTAL, "module" => module.name().to_owned()).increment(1);
        let payload = envelope.take_payload();
        let done = reply_to(slot, id, kind.clone());

        // The token is dropped while unwinding, which reports EX.
        if let Err(panic) =
            panic::catch_unwind(AssertUnwindSafe(|| module.handle(&kind, payload, done)))
        {
            warn!(
                session_id = %session.id(),
                module = module.name(),
                kind,
                panic = %panic_message(panic.as_ref()),
                "module panicked while handling command"
            );
        }
    }
}

/// Completion whose outcome fills the originating session's reserved slot.
fn reply_to(slot: ReplySlot, id: String, kind: String) -> Completion {
    Completion::new(kind.clone(), move |outcome| {
        let envelope = match outcome {
            Outcome::Respond(value) => Envelope::res(id, kind, into_payload(value)),
            Outcome::Fail { code, message } => Envelope::err(id, Some(kind), &code, message),
        };
        let _ = slot.send(&envelope);
    })
}
