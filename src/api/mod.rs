pub mod auth;
pub mod error;
pub mod rest;
pub mod ws;
