//! API request handlers

pub mod containers;
pub mod gateway;
pub mod health;
