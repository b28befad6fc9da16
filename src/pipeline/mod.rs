//! The request pipeline: triage, per-zone processing, and the session
//! that ties them to a backing volume (§4.6, §5, §6).

mod request;
mod session;
mod triage;
mod zone_thread;

pub use request::{Request, RequestKind};
pub use session::{Session, SessionState};
pub use triage::{Triage, TriageDecision};
pub use zone_thread::process;
