// Test modules

pub mod common;

mod config_test;
mod models_test;
mod rate_limiter_test;
mod repository_test;
mod scraper_test;
mod supervisor_test;
