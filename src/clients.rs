pub mod generator;
pub mod rss;
pub mod source;

pub use generator::{BulletinRequest, ChatCompletionGenerator, ChatCompletionSettings, Generator, UnavailableGenerator};
pub use rss::RssSourceAdapter;
pub use source::{RawArticle, SourceAdapter};
