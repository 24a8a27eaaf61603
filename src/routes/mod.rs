pub mod auth;
pub mod health;
pub mod issues;
pub mod menus;
pub mod projects;
pub mod rbac;
