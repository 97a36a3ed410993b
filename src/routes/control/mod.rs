mod handlers;
mod types;

pub use handlers::{apply_control, get_control, update_control};
pub use types::ControlResponse;

// Re-export utoipa path structs for OpenAPI documentation
pub use handlers::{__path_apply_control, __path_get_control, __path_update_control};
