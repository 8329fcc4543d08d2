pub mod admin;

pub use admin::{AdminUser, OptionalAdminUser};
