pub mod loader;
pub mod preprocessing;

pub use loader::{DocumentImage, ImageLoader, ImageSource};
pub use preprocessing::Preprocessor;
