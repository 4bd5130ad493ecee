//! Catalog use cases, integration routing and the conversion result consumer.

pub mod media_consumer;
pub mod routing;
pub mod use_cases;

pub use media_consumer::{CONVERSION_RESULT_ROUTING_KEY, MediaConversion, MediaConversionHandler};
pub use routing::{
    MEDIA_UPLOADED_EVENT, VIDEOS_CONVERT_EXCHANGE, VIDEOS_CONVERT_ROUTING_KEY,
    catalog_routing_table,
};
pub use use_cases::{
    CreateCategory, CreateVideo, DeleteCategory, DeleteVideo, ProcessAudioVideoMedia,
    ReplaceVideoCategories, UploadAudioVideoMedia,
};
