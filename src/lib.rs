pub mod ai;
pub mod config;
pub mod error;
pub mod extractor;
pub mod isin;
pub mod matcher;
pub mod models;
pub mod overrides;
pub mod pdf;
pub mod report;
pub mod routes;
pub mod security_parser;
pub mod swiss_number;
