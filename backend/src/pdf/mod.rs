pub mod color;
pub mod content;
pub mod coords;
pub mod extract;
pub mod fonts;
pub mod images;
pub mod loader;
pub mod patch;
pub mod preprocess;
pub mod write;
