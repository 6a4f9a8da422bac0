#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod app;
pub mod catalog;
pub mod clients;
pub mod config;
pub mod error;
pub mod observability;
pub mod pipeline;
pub mod store;
pub mod util;
