use anyhow::Context;
use armemit_codegen::code_buffer::{DEFAULT_RESERVE, INITIAL_COMMIT};

/// Reservation size for executable memory, in bytes.
pub const RESERVE_VAR: &str = "ARMEMIT_CODE_RESERVE";
/// Log an annotated listing of every compiled session.
pub const DUMP_VAR: &str = "ARMEMIT_DUMP_CODE";

/// Settings for a `JitCompiler`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JitConfig {
    /// Virtual address space reserved per code buffer.
    pub code_reserve: usize,
    /// Bytes committed up front; the rest is committed as code grows.
    pub initial_commit: usize,
    /// Log the listing of each compiled session at `debug` level.
    pub dump_code: bool,
}

impl Default for JitConfig {
    fn default() -> Self {
        JitConfig {
            code_reserve: DEFAULT_RESERVE,
            initial_commit: INITIAL_COMMIT,
            dump_code: false,
        }
    }
}

impl JitConfig {
    /// Defaults overridden by `ARMEMIT_CODE_RESERVE` and `ARMEMIT_DUMP_CODE`.
    pub fn from_env() -> Result<Self, anyhow::Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env`, reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, anyhow::Error> {
        let mut config = JitConfig::default();
        if let Some(raw) = lookup(RESERVE_VAR) {
            config.code_reserve = parse_size(&raw).with_context(|| format!("invalid {RESERVE_VAR}"))?;
        }
        if let Some(raw) = lookup(DUMP_VAR) {
            config.dump_code = parse_flag(&raw).with_context(|| format!("invalid {DUMP_VAR}"))?;
        }
        anyhow::ensure!(
            config.code_reserve >= config.initial_commit,
            "{RESERVE_VAR} ({}) is smaller than the initial commit ({})",
            config.code_reserve,
            config.initial_commit
        );
        Ok(config)
    }
}

/// Byte count in decimal or `0x` hex.
fn parse_size(raw: &str) -> Result<usize, anyhow::Error> {
    let raw = raw.trim();
    let value = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => usize::from_str_radix(hex, 16)?,
        None => raw.parse::<usize>()?,
    };
    anyhow::ensure!(value > 0, "size must be nonzero");
    Ok(value)
}

fn parse_flag(raw: &str) -> Result<bool, anyhow::Error> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "" | "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("expected a boolean, got {other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |key| vars.iter().find(|(k, _)| *k == key).map(|(_, v)| v.to_string())
    }

    #[test]
    fn defaults_without_variables() {
        let config = JitConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, JitConfig::default());
        assert_eq!(config.code_reserve, 128 * 1024 * 1024);
        assert_eq!(config.initial_commit, 64 * 1024);
        assert!(!config.dump_code);
    }

    #[test]
    fn reserve_accepts_decimal_and_hex() {
        let config = JitConfig::from_lookup(lookup(&[(RESERVE_VAR, "1048576")])).unwrap();
        assert_eq!(config.code_reserve, 1 << 20);
        let config = JitConfig::from_lookup(lookup(&[(RESERVE_VAR, " 0x200000 ")])).unwrap();
        assert_eq!(config.code_reserve, 2 << 20);
    }

    #[test]
    fn rejects_bad_sizes() {
        for raw in ["", "zero", "0", "0x", "-4096", "4096"] {
            let err = JitConfig::from_lookup(lookup(&[(RESERVE_VAR, raw)])).unwrap_err();
            assert!(format!("{err:#}").contains(RESERVE_VAR), "{raw}: {err:#}");
        }
    }

    #[test]
    fn dump_flag_spellings() {
        for (raw, expected) in [("1", true), ("YES", true), ("on", true), ("off", false), ("0", false)] {
            let config = JitConfig::from_lookup(lookup(&[(DUMP_VAR, raw)])).unwrap();
            assert_eq!(config.dump_code, expected, "{raw}");
        }
        assert!(JitConfig::from_lookup(lookup(&[(DUMP_VAR, "maybe")])).is_err());
    }
}
