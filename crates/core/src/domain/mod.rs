pub mod document;
pub mod draft;
