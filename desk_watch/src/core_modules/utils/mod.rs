pub mod annotation;
pub mod image_helper;
pub mod redaction;
