pub mod archiver;
pub mod config;
pub mod db;
pub mod error;
pub mod fetch;
pub mod images;
pub mod llm;
pub mod parser;
pub mod retry;
