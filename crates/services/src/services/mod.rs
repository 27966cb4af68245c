pub mod bouncer;
pub mod generation;
pub mod identity;
pub mod maintenance;
pub mod studio_api;
