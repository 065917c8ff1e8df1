//! Canonical tool name constants.

pub const CREATE_DIRECTORY: &str = "create_directory";
pub const CREATE_FILE: &str = "create_file";
pub const DELETE_DIRECTORY: &str = "delete_directory";
pub const DELETE_FILE: &str = "delete_file";
pub const LIST_DIRECTORY: &str = "list_directory";
pub const READ_FILE: &str = "read_file";
pub const SEARCH_IN_FILE: &str = "search_in_file";
pub const RUN_COMMAND: &str = "run_command";

/// Every tool registered by
/// [`ToolSet::with_workspace_tools`](super::core::ToolSet::with_workspace_tools).
pub const ALL: &[&str] = &[
    CREATE_DIRECTORY,
    CREATE_FILE,
    DELETE_DIRECTORY,
    DELETE_FILE,
    LIST_DIRECTORY,
    READ_FILE,
    SEARCH_IN_FILE,
    RUN_COMMAND,
];
