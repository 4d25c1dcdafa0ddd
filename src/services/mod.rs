//! Services that keep I/O out of the request pipeline

pub mod io;

pub use io::{ResultKind, ResultStore, StoredFile, UploadValidator, SUPPORTED_CONTENT_TYPES};
