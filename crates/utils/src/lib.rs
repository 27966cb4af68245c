pub mod flags;
pub mod logging;
pub mod response;
