//! Reserved input-key vocabulary injected by the resolver (spec §4.4, §6).
//!
//! Names starting with `_` are reserved system-wide (spec §5) and are never
//! user-supplied (Data Model invariant 7).

/// Ordered base command for the step's inline tool.
pub const BASE_COMMAND: &str = "_base_command";

/// Map from output ID to glob pattern.
pub const OUTPUT_GLOBS: &str = "_output_globs";

/// Container image reference, if the step runs in a container.
pub const DOCKER_IMAGE: &str = "_docker_image";

/// BV-BRC app identifier, if the step targets the BV-BRC backend.
pub const BVBRC_APP_ID: &str = "_bvbrc_app_id";

/// The Submission's forwarded credential, attached by the scheduler at
/// dispatch time rather than by the resolver (spec §4.2 phase 2).
pub const CREDENTIAL: &str = "_credential";

/// Worker Queue partition a `worker`-typed task is restricted to, if the
/// Step hints one (spec §4.6 "matches the worker's capabilities (runtime,
/// group, ...)").
pub const WORKER_GROUP: &str = "_worker_group";

/// Exit codes besides `0` that still count as success (spec §6 "Exit code
/// semantics").
pub const SUCCESS_CODES: &str = "_success_codes";

/// Exit codes that mark a failure as retry-eligible (spec §6 "Exit code
/// semantics").
pub const TEMPORARY_FAIL_CODES: &str = "_temporary_fail_codes";

/// Whether `key` falls in the reserved, resolver-injected namespace.
pub fn is_reserved_key(key: &str) -> bool {
    key.starts_with('_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_keys_are_recognized() {
        assert!(is_reserved_key(BASE_COMMAND));
        assert!(is_reserved_key(OUTPUT_GLOBS));
        assert!(is_reserved_key(DOCKER_IMAGE));
        assert!(is_reserved_key(BVBRC_APP_ID));
        assert!(is_reserved_key(CREDENTIAL));
        assert!(is_reserved_key(WORKER_GROUP));
        assert!(is_reserved_key(SUCCESS_CODES));
        assert!(is_reserved_key(TEMPORARY_FAIL_CODES));
        assert!(is_reserved_key("_anything"));
    }

    #[test]
    fn user_keys_are_not_reserved() {
        assert!(!is_reserved_key("input_file"));
        assert!(!is_reserved_key(""));
    }
}
