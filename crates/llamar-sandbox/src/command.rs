//! Heuristic screen for obviously destructive shell commands.
//!
//! This is defense in depth on top of the permission engine, not a sandbox:
//! a fixed regex table catches the classic foot-guns before a child process
//! ever starts.

use std::sync::LazyLock;

use regex::Regex;

struct DangerousPattern {
    regex: Regex,
    label: &'static str,
}

static DANGEROUS_PATTERNS: LazyLock<Vec<DangerousPattern>> = LazyLock::new(|| {
    let table: &[(&str, &str)] = &[
        (
            r"\brm\s+(-[a-zA-Z]+\s+)*-[a-zA-Z]*(rf|fr)[a-zA-Z]*\s+/\s*(;|&|\||$)",
            "recursive delete of the filesystem root",
        ),
        (
            r"\brm\s+(-[a-zA-Z]+\s+)*-[a-zA-Z]*(rf|fr)[a-zA-Z]*\s+~",
            "recursive delete of the home directory",
        ),
        (r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:", "fork bomb"),
        (
            r">\s*/dev/(sd[a-z]|nvme\d|hd[a-z]|mmcblk\d)",
            "write to a block device",
        ),
        (r"\bdd\b[^;|&]*\bof=/dev/", "dd onto a device node"),
        (r"\bmkfs(\.[a-z0-9]+)?\b", "filesystem format"),
        (
            r"\bchmod\s+(-[a-zA-Z]+\s+)*-?R?\s*777\s+/\s*(;|&|\||$)",
            "recursive chmod 777 of the filesystem root",
        ),
        (r"\bcurl\b[^|;&]*\|\s*(sudo\s+)?(ba|z)?sh\b", "curl piped into a shell"),
        (r"\bwget\b[^|;&]*\|\s*(sudo\s+)?(ba|z)?sh\b", "wget piped into a shell"),
    ];
    table
        .iter()
        .map(|(pattern, label)| DangerousPattern {
            regex: Regex::new(pattern).expect("dangerous-pattern table must compile"),
            label,
        })
        .collect()
});

/// Screen a shell command against the dangerous-pattern table.
///
/// Returns `Err` with a structured refusal naming the matched pattern; the
/// caller folds this into an Error envelope.
pub fn validate_command(command: &str) -> Result<(), String> {
    for pattern in DANGEROUS_PATTERNS.iter() {
        if pattern.regex.is_match(command) {
            return Err(format!(
                "Command refused by safety screen: looks like {}",
                pattern.label
            ));
        }
    }
    Ok(())
}
