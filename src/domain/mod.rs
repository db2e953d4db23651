pub mod article;
pub mod image;
pub mod item;
pub mod task;

pub use article::ArticleContent;
pub use image::ImageRef;
pub use item::{CachedState, SavedItem};
pub use task::{TaskKind, TaskState};
