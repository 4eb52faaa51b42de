pub mod api;

#[cfg(any(feature = "client", test))]
pub mod client;

#[cfg(any(feature = "server", test))]
pub mod app_config;
#[cfg(any(feature = "server", test))]
pub mod auth;
#[cfg(any(feature = "server", test))]
pub mod book_store;
#[cfg(any(feature = "server", test))]
pub mod bulk_load;
#[cfg(any(feature = "server", test))]
pub mod error;
#[cfg(any(feature = "server", test))]
pub mod handlers;
#[cfg(any(feature = "server", test))]
pub mod query_service;
#[cfg(any(feature = "server", test))]
pub mod rate_limiter;
#[cfg(any(feature = "server", test))]
pub mod settings;
#[cfg(any(feature = "server", test))]
pub mod telemetry;
