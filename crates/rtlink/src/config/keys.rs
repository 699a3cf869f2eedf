// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Well-known configuration keys.
//!
//! Keys are dotted, lowercase strings. Components are free to store their own
//! keys in a set; only the ones below are interpreted by the library.
//! **Never spell these literals elsewhere.**

// =======================================================================
// Execution context
// =======================================================================

/// Periodic execution rate in Hz (float, > 0).
pub const EXEC_PERIODIC_RATE: &str = "exec_cxt.periodic.rate";

// =======================================================================
// Data ports / connectors
// =======================================================================

/// Buffer length in elements (size spelling accepted: `64`, `1k`).
pub const BUFFER_LENGTH: &str = "dataport.buffer.length";

/// Full policy: `overwrite`, `do_nothing` or `block`.
pub const BUFFER_WRITE_FULL_POLICY: &str = "dataport.buffer.write.full_policy";

/// Blocking write deadline in seconds (float).
pub const BUFFER_WRITE_TIMEOUT: &str = "dataport.buffer.write.timeout";

/// Empty policy: `readback`, `do_nothing` or `block`.
pub const BUFFER_READ_EMPTY_POLICY: &str = "dataport.buffer.read.empty_policy";

/// Blocking read deadline in seconds (float).
pub const BUFFER_READ_TIMEOUT: &str = "dataport.buffer.read.timeout";

/// Transport kind: `local`, `shared_memory` or `network`.
pub const INTERFACE_TYPE: &str = "dataport.interface_type";

/// Shared-memory segment size in bytes (size spelling accepted: `64k`, `2M`).
pub const SHM_MEMORY_SIZE: &str = "dataport.shm.memory_size";

/// Network topic name (defaults to the producing port name).
pub const TOPIC: &str = "dataport.topic";

// =======================================================================
// Component
// =======================================================================

/// Comma-separated list of exported ports, normalized to `component.port`.
pub const EXPORTED_PORTS: &str = "exported_ports";
