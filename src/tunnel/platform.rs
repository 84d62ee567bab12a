//! Host platform detection and the release asset table for `cloudflared`.
//!
//! Everything here is a pure mapping so each platform combination can be
//! tested without touching the network or spawning processes.

use crate::tunnel::error::ResolutionError;

/// Release download root used when the config does not override it.
pub const DEFAULT_DOWNLOAD_BASE: &str =
    "https://github.com/cloudflare/cloudflared/releases/latest/download";

/// Smallest plausible size for an extracted `cloudflared` executable.
const MIN_BINARY_SIZE: u64 = 1024 * 1024;

/// PE executables start with `MZ`.
const PE_MAGIC: [u8; 2] = *b"MZ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Os {
    Linux,
    MacOs,
    Windows,
}

impl Os {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Linux => "linux",
            Self::MacOs => "darwin",
            Self::Windows => "windows",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    Amd64,
    X86,
    Arm64,
    Arm,
}

impl Arch {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Amd64 => "amd64",
            Self::X86 => "386",
            Self::Arm64 => "arm64",
            Self::Arm => "arm",
        }
    }

    /// Parse both Rust target names (`x86_64`) and Windows environment
    /// names (`AMD64`, `x86`, `ARM64`).
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "x86_64" | "amd64" | "x64" => Some(Self::Amd64),
            "x86" | "i386" | "i586" | "i686" | "386" => Some(Self::X86),
            "aarch64" | "arm64" => Some(Self::Arm64),
            "arm" | "armv7" | "armv7l" | "armhf" => Some(Self::Arm),
            _ => None,
        }
    }
}

/// Detected host operating system and true CPU architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Platform {
    pub os: Os,
    pub arch: Arch,
}

impl Platform {
    /// Detect the platform the current process runs on.
    pub fn detect() -> Result<Self, ResolutionError> {
        Self::from_parts(std::env::consts::OS, std::env::consts::ARCH, |key| {
            std::env::var(key).ok()
        })
    }

    /// Build a platform from a reported OS/arch pair.
    ///
    /// On Windows a 32-bit process under WOW64 reports `x86` even on a 64-bit
    /// host; `PROCESSOR_ARCHITEW6432` then holds the real architecture.
    pub fn from_parts(
        os: &str,
        arch: &str,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ResolutionError> {
        let unsupported = || ResolutionError::UnsupportedPlatform {
            os: os.to_string(),
            arch: arch.to_string(),
        };
        let os_kind = match os {
            "linux" => Os::Linux,
            "macos" => Os::MacOs,
            "windows" => Os::Windows,
            _ => return Err(unsupported()),
        };
        let reported = Arch::parse(arch).ok_or_else(unsupported)?;
        let arch_kind = if os_kind == Os::Windows {
            env("PROCESSOR_ARCHITEW6432")
                .or_else(|| env("PROCESSOR_ARCHITECTURE"))
                .and_then(|v| Arch::parse(&v))
                .unwrap_or(reported)
        } else {
            reported
        };
        Ok(Self {
            os: os_kind,
            arch: arch_kind,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    /// The download is the executable itself.
    None,
    /// Gzipped tarball containing the executable.
    TarGz,
}

/// One downloadable `cloudflared` release artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryAsset {
    pub os: Os,
    pub arch: Arch,
    pub url: String,
    /// Release file name, e.g. `cloudflared-linux-amd64`.
    pub file_name: String,
    pub archive: ArchiveKind,
    /// Minimum size of the materialized executable in bytes.
    pub min_size: u64,
    /// Required first two bytes of the executable.
    pub magic: Option<[u8; 2]>,
}

/// Release asset for `(os, arch)`.
///
/// Windows on ARM has no native build and runs the x64 one under emulation.
pub fn asset_for(base_url: &str, os: Os, arch: Arch) -> Result<BinaryAsset, ResolutionError> {
    let asset_arch = match (os, arch) {
        (Os::Windows, Arch::Arm64) => Arch::Amd64,
        (Os::Windows | Os::MacOs, Arch::Arm) | (Os::MacOs, Arch::X86) => {
            return Err(ResolutionError::UnsupportedPlatform {
                os: os.as_str().to_string(),
                arch: arch.as_str().to_string(),
            })
        }
        (_, a) => a,
    };
    let (file_name, archive, magic) = match os {
        Os::Linux => (
            format!("cloudflared-linux-{}", asset_arch.as_str()),
            ArchiveKind::None,
            None,
        ),
        Os::MacOs => (
            format!("cloudflared-darwin-{}.tgz", asset_arch.as_str()),
            ArchiveKind::TarGz,
            None,
        ),
        Os::Windows => (
            format!("cloudflared-windows-{}.exe", asset_arch.as_str()),
            ArchiveKind::None,
            Some(PE_MAGIC),
        ),
    };
    Ok(BinaryAsset {
        os,
        arch: asset_arch,
        url: format!("{}/{file_name}", base_url.trim_end_matches('/')),
        file_name,
        archive,
        min_size: MIN_BINARY_SIZE,
        magic,
    })
}

/// The single fallback asset for a primary one, used when the primary fails
/// verification.
#[must_use]
pub fn alternate_for(base_url: &str, primary: &BinaryAsset) -> Option<BinaryAsset> {
    let alt_arch = match (primary.os, primary.arch) {
        (Os::Linux | Os::Windows, Arch::Amd64) => Arch::X86,
        (Os::Linux | Os::Windows, Arch::X86) => Arch::Amd64,
        (Os::Linux, Arch::Arm64) => Arch::Arm,
        (Os::Linux, Arch::Arm) => Arch::Arm64,
        (Os::MacOs, Arch::Arm64) => Arch::Amd64,
        (Os::MacOs, Arch::Amd64) => Arch::Arm64,
        _ => return None,
    };
    asset_for(base_url, primary.os, alt_arch).ok()
}

/// File name of the cached executable for `os`.
#[must_use]
pub fn executable_name(binary: &str, os: Os) -> String {
    if os == Os::Windows {
        format!("{binary}.exe")
    } else {
        binary.to_string()
    }
}
