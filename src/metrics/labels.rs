//! Label keys and values

/// Operation label key
pub const OPERATION: &str = "operation";
/// Outcome label key
pub const OUTCOME: &str = "outcome";
/// Error category label key
pub const CATEGORY: &str = "category";

pub const OP_INITIALIZE: &str = "initialize";
pub const OP_NEW_USER: &str = "new_user";
pub const OP_UPDATE_USER: &str = "update_user";
pub const OP_DELETE_USER: &str = "delete_user";
pub const OP_CLOSE: &str = "close";

pub const OUTCOME_SUCCESS: &str = "success";
pub const OUTCOME_ERROR: &str = "error";
