use std::sync::Arc;

use crate::config::Config;
use crate::gateway::SharedGateway;
use crate::services::{
    AdminService, AttendanceService, EventService, Finalizer, PaymentService, ProfileService,
    RegistrationFeed, RegistrationService, ScanDebouncer,
};
use crate::store::SharedStore;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: SharedStore,
    pub profiles: Arc<ProfileService>,
    pub events: Arc<EventService>,
    pub registrations: Arc<RegistrationService>,
    pub payments: Arc<PaymentService>,
    pub attendance: Arc<AttendanceService>,
    pub admin: Arc<AdminService>,
    pub scan_debouncer: Arc<ScanDebouncer>,
}

impl AppState {
    pub fn new(config: Config, store: SharedStore, gateway: SharedGateway) -> Self {
        let feed = RegistrationFeed::new();
        let finalizer = Finalizer::new(store.clone(), feed.clone());

        let payments = Arc::new(PaymentService::new(
            store.clone(),
            gateway,
            finalizer.clone(),
            feed.clone(),
            config.public_base_url.clone(),
        ));
        let registrations = Arc::new(RegistrationService::new(
            store.clone(),
            payments.clone(),
            finalizer,
            feed.clone(),
        ));

        Self {
            profiles: Arc::new(ProfileService::new(store.clone())),
            events: Arc::new(EventService::new(store.clone())),
            registrations,
            payments,
            attendance: Arc::new(AttendanceService::new(store.clone())),
            admin: Arc::new(AdminService::new(store.clone(), feed)),
            store,
            scan_debouncer: Arc::new(ScanDebouncer::new(config.scan_debounce)),
            config: Arc::new(config),
        }
    }
}
