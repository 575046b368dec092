pub mod entry_models;
pub mod location_models;

pub use entry_models::{Entry, EntryDb, Video, VideoDb};
pub use location_models::{Camera, Location, LocationDb, UploadMethod};
