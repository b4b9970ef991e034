pub mod canonical;
pub mod error_shapes;
pub mod gemini;
pub mod mapping;
