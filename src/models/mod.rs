mod counter;
mod feed;
mod job;
mod post;
mod summary;

pub use counter::Counter;
pub use feed::{Feed, HTML_URL, XML_URL};
pub use job::{Job, JobHealth};
pub use post::{signature, Post};
pub use summary::StoreSummary;
