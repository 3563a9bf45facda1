mod article_store_tests;
pub mod common;
