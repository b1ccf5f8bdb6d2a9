pub mod types;
pub mod protocol;
pub mod error;
pub mod utils;

pub use types::*;
pub use protocol::*;
pub use error::*;
pub use utils::format_uptime;
