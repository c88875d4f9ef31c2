//! Dashboard HTTP back-end.
//!
//! ```text
//! ┌──────────┐  HTTP/SSE  ┌───────────────────────────────────────────────┐
//! │ Browser  │ ─────────> │  server.rs  (ServerConfig, build_router)       │
//! │          │ <───────── │    ├─ api.rs  (route handlers, AppState)       │
//! └──────────┘            │    └─ sse.rs  (job output stream)              │
//!                         │         │                                     │
//!                         │         v                                     │
//!                         │  service.rs  (DashboardService)               │
//!                         │    caches ── linking ── IssueTracker/CodeHost │
//!                         └───────────────────────────────────────────────┘
//! ```
//!
//! `server::start_server` builds one `DashboardService`, one `JobTracker` and
//! one `PollingRefresher`, and shares them through `Arc<AppState>`.

pub mod api;
pub mod server;
pub mod service;
pub mod sse;
