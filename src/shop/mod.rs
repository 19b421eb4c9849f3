//! Shop server: REST collections and the change-notification stream.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐   HTTP   ┌──────────────────────────────────────────────┐
//! │  Client  │ ───────> │  server.rs  (axum Router, ServerConfig)      │
//! │          │ <─────── │    └─ api.rs  (generic CRUD handlers)        │
//! └──────────┘   SSE    │         │                                    │
//!                       │         │ DbHandle::call()                   │
//!                       │         v                                    │
//!                       │  db.rs   (ShopDb, Stored row mappings)       │
//!                       │         │                                    │
//!                       │         │ ChangeNotifier::notify()           │
//!                       │         v                                    │
//!                       │  sse.rs  (broadcast → `data: {...}` frames)  │
//!                       └──────────────────────────────────────────────┘
//! ```
//!
//! Every collection (`/api/work-orders`, `/api/job-works`,
//! `/api/machine-types`, `/api/restok/items`, `/api/roadmaps`) supports
//! list, create, full-replace update and delete. Each successful write
//! broadcasts the collection's invalidation tag on `/api/events`.

pub mod api;
pub mod db;
pub mod server;
pub mod sse;
