/// Environment variable overriding the IPC socket path.
pub const SOCKET: &str = "RANGEBOX_SOCKET";

/// Environment variable controlling log filtering.
pub const LOG: &str = "RANGEBOX_LOG";

/// Prefix for configuration overrides picked up by the daemon.
pub const CONFIG_PREFIX: &str = "RANGEBOX_";

/// Runtime directory variable consulted for the default socket location.
pub const XDG_RUNTIME_DIR: &str = "XDG_RUNTIME_DIR";
