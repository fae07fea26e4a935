//! Result windows: the in-memory, paginated slice of a query's result order

pub mod mutable;
pub mod result_window;

pub use mutable::MutableResultWindow;
pub use result_window::ResultWindow;
