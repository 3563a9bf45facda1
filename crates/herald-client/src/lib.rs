//! Concrete fetchers and text extraction for Herald.
//!
//! The fast tier ([`HttpFetcher`]) and the HTML extractor are always built.
//! The reliable tier ([`BrowserFetcher`]) needs the `browser` feature and a
//! local Chrome/Chromium install.

#[cfg(feature = "browser")]
pub mod browser;
pub mod extractor;
pub mod http;

#[cfg(feature = "browser")]
pub use browser::{BrowserFetcher, BrowserManager};
pub use extractor::ArticleExtractor;
pub use http::{HttpFetcher, HttpSessionManager};
