//! CLI command implementations.
//!
//! | Module    | Commands handled     |
//! |-----------|----------------------|
//! | `serve`   | `Serve`, `InitDb`    |
//! | `analyze` | `Analyze`            |
//! | `score`   | `Score`              |

pub mod analyze;
pub mod score;
pub mod serve;

pub use analyze::cmd_analyze;
pub use score::cmd_score;
pub use serve::{cmd_init_db, cmd_serve};
