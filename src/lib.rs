pub mod api;
pub mod config;
pub mod domain;
pub mod engine;
pub mod fees;
pub mod gateway;
pub mod ledger;
pub mod notify;
pub mod output;
pub mod parsing;
pub mod schedule;
pub mod store;
pub mod webhook;
