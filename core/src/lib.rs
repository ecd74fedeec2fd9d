pub mod analytics;
pub mod cache;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod host;
pub mod offer;
pub mod presentation;
pub mod repository;
pub mod rng;
pub mod store;
pub mod targeting;
pub mod traffic;
pub mod types;
pub mod variant;
