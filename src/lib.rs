#[macro_use]
extern crate log;
#[macro_use]
extern crate derive_builder;
#[macro_use]
extern crate lazy_static;

pub mod browser_controller;
pub mod downloader;
pub mod extractor;
pub mod folder_writer;
pub mod paginator;
pub mod runner;
pub mod types;
pub mod utils;
