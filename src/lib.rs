#![forbid(unsafe_code)]

pub mod article;
pub mod build;
pub mod cli;
pub mod config;
pub mod epub;
pub mod formats;
pub mod ledger;
pub mod logging;
pub mod observe;
pub mod scrape;
pub mod source;
