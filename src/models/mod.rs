mod audit_log;
mod grant;
mod plan;
mod subscription;
mod transaction;
mod webhook_event;

pub use audit_log::*;
pub use grant::*;
pub use plan::*;
pub use subscription::*;
pub use transaction::*;
pub use webhook_event::*;
