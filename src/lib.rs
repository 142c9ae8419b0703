pub mod booking;
pub mod calendar;
pub mod config;
pub mod engine;
pub mod limits;
pub mod maintenance;
pub mod model;
pub mod notify;
pub mod observability;
pub mod repository;
pub mod wal;
