pub mod pagination;
pub mod session;

pub use pagination::{Page, PaginationCustomizer, PaginationState, PaginationStep};
pub use session::{CloseHandle, Session};
