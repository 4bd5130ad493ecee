//! Catalog aggregates: categories and videos.

mod category;
pub mod events;
mod media;
mod video;

pub use category::{Category, CategoryRecord};
pub use media::{AudioVideoMedia, MediaKind, MediaStatus};
pub use video::{NewVideo, Video, VideoRecord};

common::uuid_id!(
    /// Identifier of a [`Category`].
    CategoryId
);

common::uuid_id!(
    /// Identifier of a [`Video`].
    VideoId
);
