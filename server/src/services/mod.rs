pub mod admin;
pub mod attendance;
pub mod capacity;
pub mod credential;
pub mod events;
pub mod payment;
pub mod profiles;
pub mod registration;

pub use admin::AdminService;
pub use attendance::{AttendanceService, ScanDebouncer};
pub use events::EventService;
pub use payment::PaymentService;
pub use profiles::ProfileService;
pub use registration::{Finalizer, RegistrationFeed, RegistrationService};
