//! Seller listing crawler: discovers products a store has not seen yet,
//! scrapes their detail pages through a headless browser and saves them in
//! one batch.

pub mod browser;
pub mod config;
pub mod database;
pub mod harvester;
pub mod models;
pub mod scraper;
pub mod telegram;
pub mod traits;
pub mod walker;

pub use harvester::{BatchError, Harvester, StopSignal};
