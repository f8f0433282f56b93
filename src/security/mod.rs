//! Security checks applied before and after tool execution.
//!
//! [`SecurityValidator`] classifies shell commands and file paths; tools call
//! it before touching the filesystem or spawning a process.
//! [`sanitize_output`] truncates and redacts secret-shaped text before it is
//! returned to the agent loop.
//!
//! These are pattern-based heuristics layered under explicit human approval
//! (see [`crate::approval`]). They are not a sandbox and do not claim to stop
//! a determined adversary.

pub mod leak_detector;
pub mod policy;

pub use leak_detector::{contains_secret, sanitize_output, DEFAULT_MAX_OUTPUT_CHARS};
pub use policy::{
    security_level, validate_command, validate_network_access, FileOperation, PathScope,
    SecurityFinding, SecurityLevel, SecurityValidator,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reexports_are_usable() {
        assert!(validate_command("ls").is_safe);
        assert_eq!(sanitize_output("ok", DEFAULT_MAX_OUTPUT_CHARS), "ok");
    }
}
