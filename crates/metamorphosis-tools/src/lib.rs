pub mod builtin;
pub mod registry;

pub use builtin::register_review_tools;
pub use registry::ToolRegistry;
