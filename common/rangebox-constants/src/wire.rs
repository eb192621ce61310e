/// Program token for the pooled exercise fleet.
pub const PROG_EXERCISES: &str = "JS";

/// Program token for the fixed platform pair.
pub const PROG_PLATFORM: &str = "RTB";

/// Response status for a successful operation.
pub const STATUS_OK: &str = "ok";

/// Response status for a failed operation.
pub const STATUS_ERROR: &str = "error";

/// Event audience that receives every fleet event.
pub const AUDIENCE_ADMIN: &str = "admin";

/// Event audience that receives exercise-fleet events only.
pub const AUDIENCE_CLIENT: &str = "client";
