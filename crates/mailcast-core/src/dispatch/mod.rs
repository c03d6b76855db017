//! Mailing dispatch - engine, transport and periodic trigger

mod engine;
mod transport;
mod trigger;

pub use engine::{DispatchEngine, DispatchError, RunResult};
pub use transport::{FailureReason, MailTransport, OutgoingMail, SmtpMailTransport, TransportError};
pub use trigger::{DispatchTrigger, MailingOutcome, TriggerReport};
