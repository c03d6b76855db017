//! Mailing lifecycle - window evaluation and status persistence

mod lifecycle;
mod window;

pub use lifecycle::MailingLifecycle;
pub use window::{check_window, recompute_status, refresh_status, WindowCheck, WindowFlags};
