pub mod error;
pub mod types;

pub use error::{SmError, CANCELLED_CODE};
pub use types::*;
