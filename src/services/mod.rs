//! Service layer for the sync pipeline.
//!
//! This module contains the business logic for:
//! - Backend access (`BackendClient`)
//! - Media relay to object storage (`MediaRelay`)
//! - Detail and list extraction (`HtmlContentSource`)
//! - Body rewriting after relay (`ContentTransform`)
//! - Image decryption (`ImageDecryptor`)

pub mod backend;
pub mod content;
pub mod decrypt;
pub mod extract;
pub mod relay;
pub mod source;

pub use backend::{BackendClient, HttpBackendClient};
pub use content::ContentTransform;
pub use decrypt::ImageDecryptor;
pub use extract::{HtmlContentSource, SourceKind};
pub use relay::MediaRelay;
pub use source::{ContentSource, HttpPageFetcher, PageFetcher};
