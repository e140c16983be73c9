//! Command segment parsing and risk classification.
//!
//! A command line is split on shell separators into segments; each segment
//! is tokenized, stripped of leading environment assignments, and classified
//! by its basename. The overall risk is the maximum across segments.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// Commands that are always high risk, whatever their arguments.
pub const HIGH_RISK_COMMANDS: &[&str] = &[
    "rm",
    "mkfs",
    "dd",
    "shutdown",
    "reboot",
    "halt",
    "poweroff",
    "sudo",
    "su",
    "chown",
    "chmod",
    "useradd",
    "userdel",
    "usermod",
    "passwd",
    "mount",
    "umount",
    "iptables",
    "ufw",
    "firewall-cmd",
    "curl",
    "wget",
    "nc",
    "ncat",
    "netcat",
    "scp",
    "ssh",
    "ftp",
    "telnet",
];

/// Literal substrings that force high risk wherever they appear.
const HIGH_RISK_SUBSTRINGS: &[&str] = &["rm -rf /", "rm -fr /", ":(){:|:&};:"];

const GIT_MEDIUM_VERBS: &[&str] = &[
    "commit",
    "push",
    "reset",
    "clean",
    "rebase",
    "merge",
    "cherry-pick",
    "revert",
    "branch",
    "checkout",
    "switch",
    "tag",
];

const PACKAGE_MEDIUM_VERBS: &[&str] = &[
    "install",
    "add",
    "remove",
    "uninstall",
    "update",
    "publish",
];

const CARGO_MEDIUM_VERBS: &[&str] = &["add", "remove", "install", "clean", "publish"];

/// Filesystem-mutating commands that are medium on their own.
const MEDIUM_COMMANDS: &[&str] = &["touch", "mkdir", "mv", "cp", "ln"];

/// Split a command into segments on `&&`, `||`, newline, `;`, and `|`.
///
/// The separators are replaced with a NUL in a local copy, then the copy is
/// split on NUL. Callers must have applied the length ceiling first.
pub fn split_segments(command: &str) -> Vec<String> {
    let mut buf = String::with_capacity(command.len());
    let bytes = command.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'&' if i + 1 < bytes.len() && bytes[i + 1] == b'&' => {
                buf.push('\0');
                i += 2;
            }
            b'|' if i + 1 < bytes.len() && bytes[i + 1] == b'|' => {
                buf.push('\0');
                i += 2;
            }
            b'\n' | b';' | b'|' => {
                buf.push('\0');
                i += 1;
            }
            _ => {
                // Safe: we only ever skip whole ASCII separator bytes, so
                // char boundaries are preserved.
                let ch = command[i..].chars().next().unwrap_or('\0');
                buf.push(ch);
                i += ch.len_utf8();
            }
        }
    }

    buf.split('\0')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Tokenize a segment on whitespace and drop leading `VAR=value`
/// assignments. An assignment starts with a letter or underscore and
/// contains `=` before any other shell-significant character.
pub fn effective_tokens(segment: &str) -> Vec<&str> {
    let tokens: Vec<&str> = segment.split_whitespace().collect();
    let mut start = 0;
    for token in &tokens {
        if is_env_assignment(token) {
            start += 1;
        } else {
            break;
        }
    }
    tokens[start..].to_vec()
}

fn is_env_assignment(token: &str) -> bool {
    let mut chars = token.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    let mut saw_eq = false;
    for c in chars {
        if c == '=' {
            saw_eq = true;
            break;
        }
        if !c.is_ascii_alphanumeric() && c != '_' {
            return false;
        }
    }
    saw_eq
}

/// Path-insensitive basename: everything after the last `/`.
pub fn basename(word: &str) -> &str {
    word.rsplit('/').next().unwrap_or(word)
}

/// `tee` is blocked both bare and via any path spelling.
pub fn is_tee_word(word: &str) -> bool {
    word == "tee" || word.ends_with("/tee")
}

/// Non-empty `%VAR%` expansion, significant on Windows only. The span
/// between the percent signs must be a plain variable name.
pub(crate) fn contains_windows_env(command: &str) -> Option<&str> {
    let bytes = command.as_bytes();
    let mut open: Option<usize> = None;
    for (i, &b) in bytes.iter().enumerate() {
        if b == b'%' {
            match open {
                Some(start)
                    if i > start + 1
                        && bytes[start + 1..i]
                            .iter()
                            .all(|&c| c.is_ascii_alphanumeric() || c == b'_') =>
                {
                    return Some(&command[start..=i]);
                }
                _ => open = Some(i),
            }
        }
    }
    None
}

fn classify_tokens(tokens: &[&str]) -> RiskLevel {
    let exe = match tokens.first() {
        Some(exe) => basename(exe),
        None => return RiskLevel::Low,
    };

    if HIGH_RISK_COMMANDS.contains(&exe) {
        return RiskLevel::High;
    }
    if MEDIUM_COMMANDS.contains(&exe) {
        return RiskLevel::Medium;
    }

    let verb = tokens.get(1).copied().unwrap_or("");
    let medium = match exe {
        "git" => GIT_MEDIUM_VERBS.contains(&verb),
        "npm" | "pnpm" | "yarn" => PACKAGE_MEDIUM_VERBS.contains(&verb),
        "cargo" => CARGO_MEDIUM_VERBS.contains(&verb),
        _ => false,
    };
    if medium {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

/// Classify a whole command: literal high-risk substrings first, then the
/// maximum segment risk.
pub fn classify_command(command: &str) -> RiskLevel {
    for pattern in HIGH_RISK_SUBSTRINGS {
        if command.contains(pattern) {
            return RiskLevel::High;
        }
    }

    let mut risk = RiskLevel::Low;
    for segment in split_segments(command) {
        let tokens = effective_tokens(&segment);
        risk = risk.max(classify_tokens(&tokens));
        if risk == RiskLevel::High {
            break;
        }
    }
    risk
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_on_all_separators() {
        let segments = split_segments("ls && pwd || date; whoami | wc -l\nuptime");
        assert_eq!(segments, vec!["ls", "pwd", "date", "whoami", "wc -l", "uptime"]);
    }

    #[test]
    fn test_split_keeps_single_ampersand() {
        // A lone `&` is not a separator here; the structural check catches
        // background chaining before classification.
        let segments = split_segments("sleep 5 & echo hi");
        assert_eq!(segments, vec!["sleep 5 & echo hi"]);
    }

    #[test]
    fn test_env_assignment_stripping() {
        assert_eq!(effective_tokens("FOO=bar BAZ=1 ls -la"), vec!["ls", "-la"]);
        assert_eq!(effective_tokens("_X=1 pwd"), vec!["pwd"]);
        // Not an assignment: digit start.
        assert_eq!(effective_tokens("2X=1 pwd"), vec!["2X=1", "pwd"]);
        // Assignments only, no executable left.
        assert!(effective_tokens("FOO=bar").is_empty());
    }

    #[test]
    fn test_basename() {
        assert_eq!(basename("/usr/bin/rm"), "rm");
        assert_eq!(basename("ls"), "ls");
        assert_eq!(basename("./a/b/git"), "git");
    }

    #[test]
    fn test_tee_detection() {
        assert!(is_tee_word("tee"));
        assert!(is_tee_word("/usr/bin/tee"));
        assert!(is_tee_word("./tee"));
        assert!(!is_tee_word("steel"));
        assert!(!is_tee_word("tee2"));
    }

    #[test]
    fn test_high_risk_set() {
        assert_eq!(classify_command("rm file.txt"), RiskLevel::High);
        assert_eq!(classify_command("/bin/rm file.txt"), RiskLevel::High);
        assert_eq!(classify_command("sudo ls"), RiskLevel::High);
        assert_eq!(classify_command("curl https://example.com"), RiskLevel::High);
        assert_eq!(classify_command("ls && ssh host"), RiskLevel::High);
    }

    #[test]
    fn test_high_risk_literals() {
        assert_eq!(classify_command("echo rm -rf / is bad"), RiskLevel::High);
        assert_eq!(classify_command("rm -fr /"), RiskLevel::High);
        assert_eq!(classify_command(":(){:|:&};:"), RiskLevel::High);
    }

    #[test]
    fn test_medium_git_verbs() {
        assert_eq!(classify_command("git push origin main"), RiskLevel::Medium);
        assert_eq!(classify_command("git checkout -b x"), RiskLevel::Medium);
        assert_eq!(classify_command("git status"), RiskLevel::Low);
        assert_eq!(classify_command("git log --oneline"), RiskLevel::Low);
    }

    #[test]
    fn test_medium_package_managers() {
        assert_eq!(classify_command("npm install left-pad"), RiskLevel::Medium);
        assert_eq!(classify_command("yarn add react"), RiskLevel::Medium);
        assert_eq!(classify_command("pnpm remove x"), RiskLevel::Medium);
        assert_eq!(classify_command("cargo publish"), RiskLevel::Medium);
        assert_eq!(classify_command("cargo build"), RiskLevel::Low);
        assert_eq!(classify_command("npm run test"), RiskLevel::Low);
    }

    #[test]
    fn test_medium_filesystem_commands() {
        for cmd in ["touch x", "mkdir d", "mv a b", "cp a b", "ln -s a b"] {
            assert_eq!(classify_command(cmd), RiskLevel::Medium, "{cmd}");
        }
    }

    #[test]
    fn test_low_risk_defaults() {
        assert_eq!(classify_command("ls -la"), RiskLevel::Low);
        assert_eq!(classify_command("ls | grep foo"), RiskLevel::Low);
        assert_eq!(classify_command("cat README.md"), RiskLevel::Low);
    }

    #[test]
    fn test_max_across_segments() {
        assert_eq!(classify_command("ls; touch x"), RiskLevel::Medium);
        assert_eq!(classify_command("ls; touch x; rm y"), RiskLevel::High);
    }

    #[test]
    fn test_env_prefix_does_not_hide_risk() {
        assert_eq!(classify_command("PATH=/tmp rm -r x"), RiskLevel::High);
    }

    #[test]
    fn test_windows_env_detection() {
        assert_eq!(contains_windows_env("echo %PATH%"), Some("%PATH%"));
        assert!(contains_windows_env("echo 100%").is_none());
        // Empty %% is not an expansion.
        assert!(contains_windows_env("echo %%").is_none());
        // Two stray percent signs with a non-name span between them.
        assert!(contains_windows_env("echo 100% done 50%").is_none());
        assert!(contains_windows_env("plain").is_none());
    }

    #[test]
    fn test_risk_ordering() {
        assert!(RiskLevel::Low < RiskLevel::Medium);
        assert!(RiskLevel::Medium < RiskLevel::High);
    }
}
