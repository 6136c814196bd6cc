pub mod catalog;
pub mod check;
pub mod config;
pub mod health;
pub mod members;
pub mod roles;
