pub use crate::app::error::Error;
