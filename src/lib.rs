// HTTP API (sign-in, sessions, vendor proxies)
pub mod api;

// Session bearer-token extraction
pub mod auth;

// Configuration loading
pub mod config;

// Encrypted token storage
pub mod credentials;

// Shared SQLite connection
pub mod db;

// Token lifecycle management
pub mod tokens;

// Users and API sessions
pub mod users;

// Vendor OAuth and control API client
pub mod vendor;
