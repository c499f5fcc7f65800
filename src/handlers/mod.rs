// Handler modules
pub mod audit;
pub mod modules;

// Re-export all handler functions
pub use audit::handle_audit;
pub use modules::{
    ReportSink, handle_activity, handle_cleanup, handle_cost, handle_inventory, handle_orphans,
};
