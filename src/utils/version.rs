use regex::Regex;
use std::sync::OnceLock;

pub const UNKNOWN_VERSION: &str = "unknown (dev)";

/// First release whose config layout is incompatible with earlier ones.
pub const CONFIG_RESET_VERSION: (u64, u64, u64) = (0, 2, 1);

pub fn current_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Parses `0.2.1` or `0.2.1rc1` into numeric components; suffixes keep only their leading digits.
pub fn parse_version(v_str: &str) -> Vec<u64> {
    if v_str == UNKNOWN_VERSION {
        return vec![0, 0, 0];
    }

    static LEADING_DIGITS: OnceLock<Regex> = OnceLock::new();
    let re = LEADING_DIGITS.get_or_init(|| Regex::new(r"^(\d+)").expect("static regex"));

    v_str
        .trim()
        .trim_start_matches('v')
        .split('.')
        .map(|part| {
            re.captures(part)
                .and_then(|caps| caps[1].parse::<u64>().ok())
                .unwrap_or(0)
        })
        .collect()
}

fn as_triple(parts: &[u64]) -> (u64, u64, u64) {
    (
        parts.first().copied().unwrap_or(0),
        parts.get(1).copied().unwrap_or(0),
        parts.get(2).copied().unwrap_or(0),
    )
}

/// Upgrading across `CONFIG_RESET_VERSION` invalidates the stored `.env`.
pub fn needs_config_reset(old: &str, new: &str) -> bool {
    let old = as_triple(&parse_version(old));
    let new = as_triple(&parse_version(new));
    old < CONFIG_RESET_VERSION && new >= CONFIG_RESET_VERSION
}

/// Finds the installed version in `cargo install --list` output (`fin-agent v0.2.3:`,
/// or `fin-agent v0.2.3 (/src/fin-agent):` for path and git installs).
pub fn installed_version_from_list(output: &str, package: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let rest = line.strip_prefix(package)?.strip_prefix(" v")?;
        let version = rest.split(|c: char| c == ':' || c.is_whitespace()).next()?;
        (!version.is_empty()).then(|| version.to_string())
    })
}
