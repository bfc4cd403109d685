pub mod aggregate;
pub mod app;
pub mod config;
pub mod ctgov;
pub mod domain;
pub mod error;
pub mod listing;
pub mod normalize;
pub mod output;
pub mod report;
pub mod resolver;
