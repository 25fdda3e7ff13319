//! Service layer for the synchronizer.
//!
//! This module contains the source crawlers:
//! - Dense id probing of the primary source (`PrimarySourceCrawler`)
//! - Paginated listing scan of the secondary source (`SecondarySourceCrawler`)

mod primary;
mod secondary;

pub use primary::{PrimaryCrawlReport, PrimarySourceCrawler};
pub use secondary::{
    ScanStop, SecondaryCrawlReport, SecondarySourceCrawler, parse_identifier, parse_published,
};
