//! Integration tests for the crawl engine

mod control_tests;
mod crawl_tests;
mod support;
