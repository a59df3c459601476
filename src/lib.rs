pub mod analysis;
pub mod api;
pub mod app;
pub mod climate;
pub mod config;
pub mod data_source;
pub mod features;
pub mod fetch_error;
pub mod fetcher;
pub mod forecast;
pub mod locations;
pub mod services;
pub mod utils;
