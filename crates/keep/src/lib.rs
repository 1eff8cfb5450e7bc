// ABOUTME: Library entry point for the keep page extraction pipeline and offline archiver.
// ABOUTME: Re-exports the public API: Extractor, builder, Drop, processors, errors and the Archiver.

//! Keep - extract readable content from web pages and archive it offline.
//!
//! An [`Extractor`] runs a chain of [`Processor`]s over one or more
//! [`Drop`]s (a page and the pages it continues on), then assembles the
//! article. The default chain is built by [`Pipeline`]; the [`Archiver`]
//! turns the result into a self-contained HTML document.
//!
//! # Example
//!
//! ```no_run
//! use digests_keep::{ArchivePage, ExtractError, Extractor, Pipeline};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), ExtractError> {
//!     let chain = Pipeline::new().archive(ArchivePage::new()).processors();
//!     let mut ex = Extractor::builder("https://example.com/article")
//!         .processors(chain)
//!         .build()?;
//!     ex.run().await?;
//!     println!("{}", ex.archive().map(|a| a.html.as_str()).unwrap_or(ex.html()));
//!     Ok(())
//! }
//! ```

pub mod archiver;
pub mod contents;
pub mod drop;
pub mod error;
pub mod extractor;
pub mod log;
pub mod meta;
pub mod options;
pub mod pipeline;
pub mod process;
pub mod resource;
pub mod scripts;
pub mod sniff;
pub mod values;

pub use crate::archiver::{Archive, ArchiveEvent, ArchiveFlags, ArchivePage, Archiver, ArchiverBuilder};
pub use crate::drop::{Drop, DropMeta, Picture};
pub use crate::error::{ErrorCode, ExtractError};
pub use crate::extractor::Extractor;
pub use crate::options::{ExtractorBuilder, ExtractorOptions};
pub use crate::pipeline::Pipeline;
pub use crate::process::{Next, ProcessMessage, Processor, Stage};
pub use crate::resource::{CachedResource, DenyList, HttpClient, ProxyTable, ResourceCache};
pub use crate::scripts::{ContentScript, MetaUpdate, SiteConfig, SiteConfigRegistry};
