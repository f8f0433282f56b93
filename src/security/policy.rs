use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

// ── Types ────────────────────────────────────────────────────────

/// Outcome of a validation check.
///
/// `is_safe == true` with a message is an advisory: the action may proceed but
/// the message should be surfaced to the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityFinding {
    pub is_safe: bool,
    pub message: Option<String>,
}

impl SecurityFinding {
    pub fn safe() -> Self {
        Self {
            is_safe: true,
            message: None,
        }
    }

    pub fn advisory(message: impl Into<String>) -> Self {
        Self {
            is_safe: true,
            message: Some(message.into()),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            is_safe: false,
            message: Some(message.into()),
        }
    }
}

/// Kind of filesystem access being validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileOperation {
    Read,
    Write,
    Execute,
}

impl fmt::Display for FileOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileOperation::Read => write!(f, "read"),
            FileOperation::Write => write!(f, "write"),
            FileOperation::Execute => write!(f, "execute"),
        }
    }
}

/// Coarse risk classification of an operation type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityLevel {
    Low,
    Medium,
    High,
    Critical,
}

// ── Fixed rule tables ────────────────────────────────────────────

const SENSITIVE_DIRECTORIES: &[&str] = &[
    "/etc",
    "/bin",
    "/sbin",
    "/boot",
    "/sys",
    "/proc",
    "/private/etc",
    "/System",
    "/Library/LaunchDaemons",
    "/Library/LaunchAgents",
];

const SENSITIVE_FILES: &[&str] = &[
    "passwd",
    "shadow",
    "sudoers",
    "hosts",
    "id_rsa",
    "id_ed25519",
    "authorized_keys",
    ".env",
    "credentials",
    "secrets",
];

const DANGEROUS_EXTENSIONS: &[&str] = &[
    "exe", "dll", "so", "dylib", "scr", "bat", "cmd", "vbs", "app", "deb", "rpm",
];

fn dangerous_command_patterns() -> &'static [(Regex, &'static str)] {
    static PATTERNS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            (r"rm\s+-rf\s+/", "recursive delete from root (rm -rf /)"),
            (r"dd\s+if=", "raw disk write (dd if=)"),
            (r"mkfs\.", "filesystem creation (mkfs.)"),
            (
                r":\s*\(\s*\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:",
                "fork bomb",
            ),
            (r"curl.*\|\s*(ba)?sh", "piping a curl download into a shell"),
            (r"wget.*\|\s*(ba)?sh", "piping a wget download into a shell"),
            (r"chmod\s+(-R\s+)?777", "world-writable permissions (chmod 777)"),
            (r"chown\s+(-R\s+)?root", "ownership change to root (chown root)"),
            (r"(^|[\s;&|])sudo\s+", "privilege elevation (sudo)"),
        ]
        .into_iter()
        .filter_map(|(pattern, label)| {
            Regex::new(&format!("(?i){pattern}"))
                .map(|re| (re, label))
                .map_err(|e| tracing::error!("invalid command pattern {pattern}: {e}"))
                .ok()
        })
        .collect()
    })
}

fn network_command_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?i)\b(curl|wget|nc|netcat)\b").ok())
        .as_ref()
}

fn package_install_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?i)\b(apt|apt-get|yum|dnf|brew|pip|pip3|npm)\s+install\b").ok())
        .as_ref()
}

// ── Command validation ───────────────────────────────────────────

/// Classify a shell command.
///
/// Rejects destructive patterns; accepts everything else, carrying an
/// advisory for network access or package installation.
pub fn validate_command(command: &str) -> SecurityFinding {
    for (pattern, label) in dangerous_command_patterns() {
        if pattern.is_match(command) {
            return SecurityFinding::rejected(format!(
                "Dangerous command pattern detected: {label}"
            ));
        }
    }

    if network_command_pattern().is_some_and(|re| re.is_match(command)) {
        return SecurityFinding::advisory("Network operation detected - ensure this is intended");
    }

    if package_install_pattern().is_some_and(|re| re.is_match(command)) {
        return SecurityFinding::advisory(
            "Package installation detected - verify the package source",
        );
    }

    SecurityFinding::safe()
}

/// Non-blocking check on an outbound URL.
pub fn validate_network_access(url: &str) -> SecurityFinding {
    let lower = url.trim().to_ascii_lowercase();
    let is_loopback = ["http://localhost", "http://127.0.0.1", "http://[::1]"]
        .iter()
        .any(|prefix| lower.starts_with(prefix));
    if lower.starts_with("http://") && !is_loopback {
        return SecurityFinding::advisory(
            "Non-HTTPS URL detected - data may be transmitted insecurely",
        );
    }
    SecurityFinding::safe()
}

/// Risk level for an operation or tool name. Unknown operations are `Medium`.
pub fn security_level(operation: &str) -> SecurityLevel {
    match operation.to_ascii_lowercase().as_str() {
        "read" | "glob" | "grep" | "todowrite" => SecurityLevel::Low,
        "bash" => SecurityLevel::High,
        "delete" => SecurityLevel::Critical,
        _ => SecurityLevel::Medium,
    }
}

// ── Path validation ──────────────────────────────────────────────

/// The two roots file operations are confined to.
#[derive(Debug, Clone)]
pub struct PathScope {
    pub cwd: PathBuf,
    pub home: PathBuf,
}

impl PathScope {
    pub fn new(cwd: impl Into<PathBuf>, home: impl Into<PathBuf>) -> Self {
        let cwd = cwd.into();
        let home = home.into();
        Self {
            cwd: cwd.canonicalize().unwrap_or(cwd),
            home: home.canonicalize().unwrap_or(home),
        }
    }

    /// Scope built from the process working directory and the user's home.
    pub fn from_env() -> anyhow::Result<Self> {
        let cwd = std::env::current_dir()?;
        let home = directories::UserDirs::new()
            .map(|dirs| dirs.home_dir().to_path_buf())
            .ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))?;
        Ok(Self::new(cwd, home))
    }

    fn contains(&self, path: &Path) -> bool {
        path.starts_with(&self.cwd) || path.starts_with(&self.home)
    }
}

/// Path and command validator bound to a [`PathScope`].
///
/// Pattern-based defense in depth. It is not a sandbox.
#[derive(Debug, Clone)]
pub struct SecurityValidator {
    scope: PathScope,
}

impl SecurityValidator {
    pub fn new(scope: PathScope) -> Self {
        Self { scope }
    }

    pub fn scope(&self) -> &PathScope {
        &self.scope
    }

    pub fn validate_command(&self, command: &str) -> SecurityFinding {
        validate_command(command)
    }

    /// Resolve `path` the way the tools will and check it against the scope
    /// and the sensitive-location tables.
    pub fn validate_file_path(&self, path: &str, operation: FileOperation) -> SecurityFinding {
        if path.contains('\0') {
            return SecurityFinding::rejected("Path validation error: path contains a null byte");
        }

        let resolved = self.resolve(path);

        if !self.scope.contains(&resolved) {
            return SecurityFinding::rejected(format!(
                "File path '{}' is outside allowed scope.\n\
                 Allowed paths:\n  \
                 - Current directory: {}\n  \
                 - Home directory: {}\n\
                 Use absolute paths within these directories.",
                resolved.display(),
                self.scope.cwd.display(),
                self.scope.home.display()
            ));
        }

        for dir in SENSITIVE_DIRECTORIES {
            if resolved.starts_with(dir) {
                return SecurityFinding::rejected(format!(
                    "Access to sensitive directory denied: {dir}"
                ));
            }
        }

        let file_name = resolved
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        if SENSITIVE_FILES.contains(&file_name.as_str()) {
            return match operation {
                FileOperation::Read => {
                    SecurityFinding::advisory(format!("Reading sensitive file: {file_name}"))
                }
                FileOperation::Write | FileOperation::Execute => SecurityFinding::rejected(
                    format!("Write/execute operation on sensitive file denied: {file_name}"),
                ),
            };
        }

        if operation == FileOperation::Execute {
            if let Some(ext) = resolved.extension().map(|e| e.to_string_lossy().to_lowercase()) {
                if DANGEROUS_EXTENSIONS.contains(&ext.as_str()) {
                    return SecurityFinding::rejected(format!(
                        "Execution of .{ext} files is not allowed"
                    ));
                }
            }
        }

        SecurityFinding::safe()
    }

    /// Absolute, normalized form of `path`.
    ///
    /// `~` expands to the scope's home, relative paths join the scope's cwd,
    /// and the longest existing prefix is canonicalized so symlinks cannot
    /// point outside the scope unnoticed.
    pub fn resolve(&self, path: &str) -> PathBuf {
        let home = self.scope.home.to_string_lossy().into_owned();
        let expanded = shellexpand::tilde_with_context(path, || Some(home.clone()));
        let candidate = PathBuf::from(expanded.as_ref());
        let absolute = if candidate.is_absolute() {
            candidate
        } else {
            self.scope.cwd.join(candidate)
        };
        canonicalize_existing_prefix(&normalize_lexically(&absolute))
    }
}

fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn canonicalize_existing_prefix(path: &Path) -> PathBuf {
    let mut existing = path.to_path_buf();
    let mut tail = Vec::new();
    loop {
        if let Ok(canonical) = existing.canonicalize() {
            let mut out = canonical;
            for part in tail.iter().rev() {
                out.push(part);
            }
            return out;
        }
        match (existing.file_name().map(|n| n.to_os_string()), existing.parent()) {
            (Some(name), Some(parent)) => {
                tail.push(name);
                existing = parent.to_path_buf();
            }
            _ => return path.to_path_buf(),
        }
    }
}
