pub mod balance;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod linking;
pub mod models;
pub mod networth;
pub mod provider;
pub mod storage;
pub mod sync;
pub mod users;
