// RPC method name constants, mirrored in contracts/jsonrpc-methods.json.

// ── Daemon-internal ────────────────────────────────────────────────
pub const RPC_PING: &str = "rpc.ping";
pub const DAEMON_SHUTDOWN: &str = "daemon.shutdown";

// ── Lease ──────────────────────────────────────────────────────────
pub const LEASE_RESERVE: &str = "lease.reserve";
pub const LEASE_EXTEND: &str = "lease.extend";
pub const LEASE_RELEASE: &str = "lease.release";
pub const LEASE_RELEASE_ALL: &str = "lease.release_all";
pub const LEASE_GET: &str = "lease.get";
pub const LEASE_MINE: &str = "lease.mine";
pub const LEASE_RECONCILE: &str = "lease.reconcile";

// ── Editor ─────────────────────────────────────────────────────────
pub const EDITOR_EVENT: &str = "editor.event";

/// All methods the daemon currently dispatches.
pub const IMPLEMENTED_METHODS: &[&str] = &[
    RPC_PING,
    DAEMON_SHUTDOWN,
    LEASE_RESERVE,
    LEASE_EXTEND,
    LEASE_RELEASE,
    LEASE_RELEASE_ALL,
    LEASE_GET,
    LEASE_MINE,
    LEASE_RECONCILE,
    EDITOR_EVENT,
];

/// Methods acknowledged in the contract as planned but not yet implemented.
pub const PLANNED_METHODS: &[&str] = &[];
