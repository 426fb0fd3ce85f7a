//! Hoard Config
//!
//! This crate contains the serializable settings for a hoard model store and
//! the lookup table of known model categories.
//!
//! Configuration can be loaded from:
//! - JSON files (via CLI with `--config=hoard.json`)
//! - Built-in defaults rooted at a base directory
//!
//! Every other crate receives a [`StoreConfig`] (or pieces of it) explicitly;
//! there is no process-wide configuration instance.

mod category;
mod error;
mod path;
mod store;

pub use category::{ANY_EXTENSION, Category, CategoryDef, MODEL_EXTENSIONS};
pub use error::ConfigError;
pub use path::{clean_url, normalize, short_hash, url_file_name};
pub use store::{DownloadPolicy, INTERNAL_CATEGORIES, StoreConfig};
