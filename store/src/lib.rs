pub mod port_allocator;
pub mod schema;
pub mod session_store;
pub mod task_catalog;

pub use port_allocator::PortAllocator;
pub use schema::init_schema;
pub use session_store::SessionStore;
pub use task_catalog::PgTaskCatalog;
