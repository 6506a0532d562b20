//! File Upload Store (spec §4.C7): content-addressed binary uploads and
//! bounded image thumbnailing.

mod error;
mod model;
mod store;

pub use error::UploadError;
pub use model::{FileUpload, UploadRequest};
pub use store::UploadStore;
