/// Instance status: container exists and is running.
pub const RUNNING: &str = "running";

/// Instance status: no container exists for the slot or name.
pub const NOT_FOUND: &str = "not_found";

/// Instance status: container was stopped and removed by this operation.
pub const REMOVED: &str = "removed";

/// Instance status: the runtime reported an error for this entry.
pub const ERROR: &str = "error";

/// Host port value reported when no port mapping exists.
pub const NO_HOST_PORT: i64 = -1;
