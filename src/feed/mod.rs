mod fetcher;
mod opml;
mod result;
mod source;
mod sync;

pub use fetcher::{convert_feed, version_tag, Conditional, FeedBackend, FeedFetcher};
pub use self::opml::{load_opml, parse_opml_file, parse_opml_str, OpmlReader, OutlineAttrs, UNCATEGORIZED};
pub use result::{ParseResult, RawContent, RawEntry, RawFeedMeta, RawLink, RawTag, NOT_MODIFIED};
pub use source::{parse_feed_list, read_feed_list, FeedRef, FeedRefType};
pub use sync::FeedSync;
