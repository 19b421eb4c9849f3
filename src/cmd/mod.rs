//! CLI command implementations.
//!
//! | Module    | Commands handled |
//! |-----------|------------------|
//! | `project` | `Init`           |
//! | `serve`   | `Serve`          |
//! | `watch`   | `Watch`          |
//! | `orders`  | `Orders`         |
//! | `config`  | `Config`         |

pub mod config;
pub mod orders;
pub mod project;
pub mod serve;
pub mod watch;

pub use config::cmd_config;
pub use orders::cmd_orders;
pub use project::cmd_init;
pub use serve::cmd_serve;
pub use watch::cmd_watch;
