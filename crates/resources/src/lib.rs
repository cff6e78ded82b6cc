pub mod application;
pub mod catalog;
pub mod idp;
pub mod store;
