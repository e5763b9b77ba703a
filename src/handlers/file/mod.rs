pub mod staging;
pub mod upload;

// Re-export handler functions for use in routing
pub use staging::flush as staging_flush;
pub use staging::list as staging_list;
pub use upload::delete as upload_delete;
pub use upload::post as upload_post;
