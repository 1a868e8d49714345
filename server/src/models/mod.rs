pub mod admin_action;
pub mod attendance;
pub mod block;
pub mod credential;
pub mod event;
pub mod payment;
pub mod registration;
pub mod user;

pub use admin_action::{AdminAction, AdminActionType};
pub use attendance::AttendanceRecord;
pub use block::BlockRecord;
pub use credential::Credential;
pub use event::{Event, EventCategory, NewEvent, Pricing};
pub use payment::{PaymentRecord, PaymentStatus};
pub use registration::{Registration, RegistrationStatus};
pub use user::{Profile, Role};
