use std::fmt;

use bitflags::bitflags;
use tracing::debug;

bitflags! {
    /// Instruction-set extensions the emitted code may rely on.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CpuFeatures: u32 {
        /// DSP multiply and saturating arithmetic (ARMv5TE).
        const EDSP  = 1 << 0;
        /// ARMv6 media instructions: parallel add/sub, extend, pack, saturate.
        const ARMV6 = 1 << 1;
        const VFP   = 1 << 2;
        /// 32-bit Advanced SIMD.
        const NEON  = 1 << 3;
        /// AArch64 Advanced SIMD.
        const ASIMD = 1 << 4;
    }
}

impl CpuFeatures {
    /// Read the `Features` and `CPU architecture` lines of a Linux
    /// `/proc/cpuinfo`. Unknown flags are ignored.
    pub fn parse_cpuinfo(text: &str) -> CpuFeatures {
        let mut features = CpuFeatures::empty();
        for line in text.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            match key.trim() {
                "Features" => {
                    for flag in value.split_whitespace() {
                        features |= match flag {
                            "edsp" => CpuFeatures::EDSP,
                            "vfp" | "fp" => CpuFeatures::VFP,
                            "neon" => CpuFeatures::NEON,
                            "asimd" => CpuFeatures::ASIMD,
                            _ => CpuFeatures::empty(),
                        };
                    }
                }
                "CPU architecture" => {
                    // "7", "8", or "AArch64" on some older kernels.
                    let arch = value.trim();
                    let version = arch
                        .trim_end_matches(|c: char| c.is_ascii_alphabetic())
                        .parse::<u32>()
                        .unwrap_or(if arch == "AArch64" { 8 } else { 0 });
                    if version >= 6 {
                        features |= CpuFeatures::ARMV6;
                    }
                }
                _ => {}
            }
        }
        features
    }

    /// Features of the host CPU, empty when they cannot be determined.
    pub fn detect() -> CpuFeatures {
        #[cfg(target_os = "linux")]
        if let Ok(text) = std::fs::read_to_string("/proc/cpuinfo") {
            let features = CpuFeatures::parse_cpuinfo(&text);
            debug!(?features, "cpu features from /proc/cpuinfo");
            return features;
        }

        #[cfg(target_arch = "aarch64")]
        if std::arch::is_aarch64_feature_detected!("neon") {
            return CpuFeatures::ASIMD | CpuFeatures::VFP | CpuFeatures::ARMV6;
        }

        debug!("cpu features unavailable");
        CpuFeatures::empty()
    }
}

impl fmt::Display for CpuFeatures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        for (i, (name, _)) in self.iter_names().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            f.write_str(&name.to_ascii_lowercase())?;
        }
        Ok(())
    }
}
