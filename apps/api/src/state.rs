use std::sync::Arc;

use crate::auth::OtpStore;
use crate::dispatch::Dispatcher;
use crate::mail::MailService;
use crate::notify::SessionRegistry;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    /// Live WebSocket sessions; also the workers' notifier.
    pub sessions: Arc<SessionRegistry>,
    pub otp: Arc<dyn OtpStore>,
    pub mail: Arc<MailService>,
}
