pub mod issue;
pub mod menu;
pub mod project;
pub mod rbac;
pub mod user;
