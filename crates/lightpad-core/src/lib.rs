// lightpad-core: Sessions, subscriptions and a client facade over lightpad-api.

pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod session;
pub mod subscription;

// ── Primary re-exports ──────────────────────────────────────────────
pub use client::LightpadClient;
pub use config::ClientConfig;
pub use error::{CoreError, SubscriptionError};
pub use logging::init_tracing;
pub use session::{CloudSessions, SessionProvider, StaticSession};
pub use subscription::{Subscriber, Subscription};

// Re-export the api types consumers need alongside the core ones.
pub use lightpad_api::{
    Command, Credentials, DeviceEndpoint, ForceGlow, LightpadEvent, LoadMetrics, Session, TlsMode,
};
