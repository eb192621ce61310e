/// Label carrying the managing program of a container.
pub const PROGRAM: &str = "rangebox.program";

/// `rangebox.program` value for pooled exercise instances.
pub const PROGRAM_EXERCISE: &str = "exercise";

/// `rangebox.program` value for the fixed platform pair.
pub const PROGRAM_PLATFORM: &str = "platform";

/// `rangebox.program` value for short-lived helper containers.
pub const PROGRAM_HELPER: &str = "helper";

/// Label carrying the per-instance lifespan in minutes.
pub const LIFESPAN_MINUTES: &str = "rangebox.lifespan-minutes";
