// Library exports for GreenPoint
// The binary and the integration tests both build on these modules

pub mod accounts;
pub mod backend;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod events;
pub mod extractors;
pub mod feed;
pub mod leaderboard;
pub mod models;
pub mod points;
pub mod provision;
pub mod routes;
pub mod session;
pub mod state;
pub mod uploads;
