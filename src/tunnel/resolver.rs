//! Locating or provisioning a runnable `cloudflared` executable.
//!
//! Resolution order:
//!
//! 1. **Search path**: `cloudflared --version` by bare name. An operator
//!    managed install always wins and no network access happens.
//! 2. **Cache**: a binary previously downloaded into the cache directory.
//! 3. **Download**: the release asset for the detected platform, verified
//!    statically (size, magic header) and then by running it. If the primary
//!    asset is rejected, the single alternate-architecture asset is tried
//!    once.
//!
//! Downloads stream into a [`tempfile::NamedTempFile`] inside the cache
//! directory and only reach their final name through an atomic rename, so a
//! concurrent resolver never observes a half-written binary and an abandoned
//! download leaves nothing behind.

use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::tunnel::error::ResolutionError;
use crate::tunnel::platform::{
    alternate_for, asset_for, executable_name, ArchiveKind, BinaryAsset, Platform,
};
use crate::tunnel::types::{BinarySource, ResolvedBinary};

/// Per-chunk read timeout; a stalled socket fails the download instead of
/// hanging resolution.
const CHUNK_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound for a `--version` probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(15);

/// Streams a URL into a writer.
#[async_trait]
pub trait Fetch: Send + Sync {
    /// Write the body of `url` into `dest`, returning the number of bytes.
    async fn fetch(
        &self,
        url: &str,
        dest: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64, String>;
}

/// Decides whether a program can be executed on this host.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, program: &Path) -> bool;
}

/// [`Fetch`] over HTTPS via `reqwest`.
pub struct HttpFetcher {
    http: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, reqwest::Error> {
        // GitHub's release CDN rejects requests without a user agent.
        let http = reqwest::Client::builder()
            .user_agent(concat!("portal/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::limited(10))
            .connect_timeout(Duration::from_secs(15))
            .timeout(Duration::from_secs(600))
            .build()?;
        Ok(Self { http })
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn fetch(
        &self,
        url: &str,
        dest: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64, String> {
        let mut resp = self.http.get(url).send().await.map_err(|e| e.to_string())?;
        if !resp.status().is_success() {
            return Err(format!("HTTP {}", resp.status()));
        }
        let mut written = 0u64;
        loop {
            let chunk = tokio::time::timeout(CHUNK_TIMEOUT, resp.chunk())
                .await
                .map_err(|_| format!("no data for {}s", CHUNK_TIMEOUT.as_secs()))?
                .map_err(|e| e.to_string())?;
            let Some(chunk) = chunk else { break };
            dest.write_all(&chunk).await.map_err(|e| e.to_string())?;
            written += chunk.len() as u64;
        }
        dest.flush().await.map_err(|e| e.to_string())?;
        Ok(written)
    }
}

/// [`Probe`] that runs `<program> --version` and expects a zero exit plus a
/// version banner.
pub struct VersionProbe;

#[async_trait]
impl Probe for VersionProbe {
    async fn probe(&self, program: &Path) -> bool {
        let mut cmd = Command::new(program);
        cmd.arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(windows)]
        cmd.creation_flags(crate::tunnel::process::CREATE_NO_WINDOW);

        match tokio::time::timeout(PROBE_TIMEOUT, cmd.output()).await {
            Ok(Ok(out)) => {
                let text = format!(
                    "{}{}",
                    String::from_utf8_lossy(&out.stdout),
                    String::from_utf8_lossy(&out.stderr)
                );
                let ok = out.status.success() && text.to_lowercase().contains("version");
                debug!("Probe {}: ok={ok} {}", program.display(), text.trim());
                ok
            }
            Ok(Err(e)) => {
                debug!("Probe {}: {e}", program.display());
                false
            }
            Err(_) => {
                warn!("Probe {} timed out", program.display());
                false
            }
        }
    }
}

/// Where to look and what to fetch.
#[derive(Debug, Clone)]
pub struct ResolverOptions {
    /// Program name, e.g. `cloudflared`.
    pub binary_name: String,
    /// Directory holding downloaded binaries.
    pub cache_dir: PathBuf,
    /// Release download root.
    pub download_base: String,
}

/// Why one asset could not be installed.
enum InstallError {
    /// Network or filesystem failure. Not retried with the alternate.
    Download(ResolutionError),
    /// The artifact arrived but is not usable here.
    Rejected(String),
}

/// Produces a verified, runnable tunnel client path.
pub struct BinaryResolver {
    options: ResolverOptions,
    platform: Option<Platform>,
    fetcher: Arc<dyn Fetch>,
    prober: Arc<dyn Probe>,
}

impl BinaryResolver {
    /// Resolver backed by HTTPS downloads and real `--version` probes.
    pub fn new(options: ResolverOptions) -> Result<Self, ResolutionError> {
        let fetcher = HttpFetcher::new().map_err(|e| ResolutionError::Download {
            url: options.download_base.clone(),
            reason: format!("HTTP client setup failed: {e}"),
        })?;
        Ok(Self::with_parts(
            options,
            Arc::new(fetcher),
            Arc::new(VersionProbe),
        ))
    }

    pub fn with_parts(
        options: ResolverOptions,
        fetcher: Arc<dyn Fetch>,
        prober: Arc<dyn Probe>,
    ) -> Self {
        Self {
            options,
            platform: None,
            fetcher,
            prober,
        }
    }

    /// Pin the platform instead of detecting it.
    #[must_use]
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }

    pub fn options(&self) -> &ResolverOptions {
        &self.options
    }

    fn platform(&self) -> Result<Platform, ResolutionError> {
        self.platform.map_or_else(Platform::detect, Ok)
    }

    /// Resolve a runnable binary, downloading it if necessary.
    pub async fn resolve(&self) -> Result<ResolvedBinary, ResolutionError> {
        let detected = self.platform();
        let (os, arch) = detected.as_ref().map_or(
            (std::env::consts::OS, std::env::consts::ARCH),
            |p| (p.os.as_str(), p.arch.as_str()),
        );

        let bare = PathBuf::from(&self.options.binary_name);
        if self.prober.probe(&bare).await {
            info!("Using {} from search path", self.options.binary_name);
            return Ok(ResolvedBinary {
                path: bare,
                os,
                arch,
                verified: true,
                source: BinarySource::SearchPath,
            });
        }

        let platform = detected?;
        let cached = self.cached_path(&platform);
        if cached.exists() && self.prober.probe(&cached).await {
            info!("Using cached {}", cached.display());
            return Ok(ResolvedBinary {
                path: cached,
                os,
                arch,
                verified: true,
                source: BinarySource::Cache,
            });
        }

        let base = &self.options.download_base;
        let primary = asset_for(base, platform.os, platform.arch)?;
        let first_reason = match self.install(&primary, &cached).await {
            Ok(path) => return Ok(downloaded(path, &primary)),
            Err(InstallError::Download(e)) => return Err(e),
            Err(InstallError::Rejected(reason)) => reason,
        };
        warn!("{} rejected: {first_reason}", primary.file_name);

        let Some(alternate) = alternate_for(base, &primary) else {
            return Err(ResolutionError::Verification(format!(
                "{}: {first_reason}",
                primary.file_name
            )));
        };
        info!("Retrying with alternate asset {}", alternate.file_name);
        match self.install(&alternate, &cached).await {
            Ok(path) => Ok(downloaded(path, &alternate)),
            Err(InstallError::Download(e)) => Err(e),
            Err(InstallError::Rejected(reason)) => {
                Err(ResolutionError::Verification(format!(
                    "{}: {first_reason}; {}: {reason}",
                    primary.file_name, alternate.file_name
                )))
            }
        }
    }

    fn cached_path(&self, platform: &Platform) -> PathBuf {
        self.options
            .cache_dir
            .join(executable_name(&self.options.binary_name, platform.os))
    }

    /// Download, unpack, verify and move one asset to `dest`.
    async fn install(&self, asset: &BinaryAsset, dest: &Path) -> Result<PathBuf, InstallError> {
        let dir = &self.options.cache_dir;
        let io_failure = |e: io::Error| {
            InstallError::Download(ResolutionError::Download {
                url: asset.url.clone(),
                reason: e.to_string(),
            })
        };

        tokio::fs::create_dir_all(dir).await.map_err(io_failure)?;
        let download = tempfile::Builder::new()
            .prefix(".download-")
            .suffix(".part")
            .tempfile_in(dir)
            .map_err(io_failure)?;
        let handle = download.as_file().try_clone().map_err(io_failure)?;
        let mut file = tokio::fs::File::from_std(handle);

        info!("Downloading {}", asset.url);
        match self.fetcher.fetch(&asset.url, &mut file).await {
            Ok(bytes) => debug!("Downloaded {bytes} bytes from {}", asset.url),
            Err(reason) => {
                if let Err(e) = file.flush().await {
                    debug!("Flush of partial download failed: {e}");
                }
                drop(file);
                if let Err(e) = download.close() {
                    warn!("Failed to remove partial download: {e}");
                }
                return Err(InstallError::Download(ResolutionError::Download {
                    url: asset.url.clone(),
                    reason,
                }));
            }
        }
        file.flush().await.map_err(io_failure)?;
        file.sync_all().await.map_err(io_failure)?;
        drop(file);

        let staged = match asset.archive {
            ArchiveKind::None => download,
            ArchiveKind::TarGz => {
                let archive = download.path().to_path_buf();
                let dir = dir.clone();
                let entry = self.options.binary_name.clone();
                let extracted =
                    tokio::task::spawn_blocking(move || extract_tar_gz(&archive, &dir, &entry))
                        .await
                        .map_err(|e| InstallError::Rejected(format!("extract task failed: {e}")))?;
                drop(download);
                extracted.map_err(|e| InstallError::Rejected(format!("bad archive: {e}")))?
            }
        };

        set_executable(staged.path()).await.map_err(io_failure)?;
        verify_static(staged.path(), asset)
            .await
            .map_err(InstallError::Rejected)?;

        staged
            .persist(dest)
            .map_err(|e| io_failure(e.error))?;

        if self.prober.probe(dest).await {
            info!("Installed {} to {}", asset.file_name, dest.display());
            Ok(dest.to_path_buf())
        } else {
            if let Err(e) = tokio::fs::remove_file(dest).await {
                warn!("Failed to remove rejected binary {}: {e}", dest.display());
            }
            Err(InstallError::Rejected("binary does not run on this host".into()))
        }
    }
}

fn downloaded(path: PathBuf, asset: &BinaryAsset) -> ResolvedBinary {
    ResolvedBinary {
        path,
        os: asset.os.as_str(),
        arch: asset.arch.as_str(),
        verified: true,
        source: BinarySource::Download,
    }
}

/// Pull the executable named `entry` out of a `.tgz` into a temp file in `dir`.
fn extract_tar_gz(archive: &Path, dir: &Path, entry: &str) -> io::Result<NamedTempFile> {
    let file = std::fs::File::open(archive)?;
    let mut tar = tar::Archive::new(flate2::read::GzDecoder::new(file));
    for item in tar.entries()? {
        let mut item = item?;
        let is_target = item.header().entry_type().is_file()
            && item.path()?.file_name() == Some(OsStr::new(entry));
        if is_target {
            let mut out = tempfile::Builder::new()
                .prefix(".extract-")
                .tempfile_in(dir)?;
            io::copy(&mut item, out.as_file_mut())?;
            out.as_file().sync_all()?;
            return Ok(out);
        }
    }
    Err(io::Error::new(
        io::ErrorKind::NotFound,
        format!("no `{entry}` entry in archive"),
    ))
}

#[cfg(unix)]
async fn set_executable(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).await
}

#[cfg(not(unix))]
async fn set_executable(_path: &Path) -> io::Result<()> {
    Ok(())
}

/// Size and magic-header checks that need no execution.
async fn verify_static(path: &Path, asset: &BinaryAsset) -> Result<(), String> {
    let len = tokio::fs::metadata(path)
        .await
        .map_err(|e| format!("stat failed: {e}"))?
        .len();
    if len < asset.min_size {
        return Err(format!(
            "file is {len} bytes, expected at least {}",
            asset.min_size
        ));
    }
    if let Some(magic) = asset.magic {
        let mut head = [0u8; 2];
        let mut file = tokio::fs::File::open(path)
            .await
            .map_err(|e| format!("open failed: {e}"))?;
        file.read_exact(&mut head)
            .await
            .map_err(|e| format!("read failed: {e}"))?;
        if head != magic {
            return Err(format!("bad header {head:02x?}, expected {magic:02x?}"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;
    use crate::tunnel::platform::{Arch, Os, DEFAULT_DOWNLOAD_BASE};

    const BIG: usize = 1024 * 1024 + 16;

    /// Serves a body per URL suffix; counts calls.
    struct FakeFetcher {
        calls: AtomicUsize,
        urls: Mutex<Vec<String>>,
        body: Box<dyn Fn(&str) -> Result<Vec<u8>, Vec<u8>> + Send + Sync>,
    }

    impl FakeFetcher {
        fn new(body: impl Fn(&str) -> Result<Vec<u8>, Vec<u8>> + Send + Sync + 'static) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                urls: Mutex::new(Vec::new()),
                body: Box::new(body),
            }
        }
    }

    #[async_trait]
    impl Fetch for FakeFetcher {
        async fn fetch(
            &self,
            url: &str,
            dest: &mut (dyn AsyncWrite + Unpin + Send),
        ) -> Result<u64, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.urls.lock().unwrap().push(url.to_string());
            match (self.body)(url) {
                Ok(bytes) => {
                    dest.write_all(&bytes).await.map_err(|e| e.to_string())?;
                    Ok(bytes.len() as u64)
                }
                // Write a partial body, then fail mid-stream.
                Err(partial) => {
                    dest.write_all(&partial).await.map_err(|e| e.to_string())?;
                    Err("connection reset by peer".into())
                }
            }
        }
    }

    /// Writes part of a body, then never finishes.
    struct StalledFetcher;

    #[async_trait]
    impl Fetch for StalledFetcher {
        async fn fetch(
            &self,
            _url: &str,
            dest: &mut (dyn AsyncWrite + Unpin + Send),
        ) -> Result<u64, String> {
            dest.write_all(&[7u8; 4096]).await.map_err(|e| e.to_string())?;
            dest.flush().await.map_err(|e| e.to_string())?;
            std::future::pending().await
        }
    }

    /// Accepts a path when its contents start with the given marker.
    struct FakeProbe {
        calls: AtomicUsize,
        on_path: bool,
        runnable_marker: &'static [u8],
    }

    impl FakeProbe {
        fn new(on_path: bool, runnable_marker: &'static [u8]) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                on_path,
                runnable_marker,
            }
        }
    }

    #[async_trait]
    impl Probe for FakeProbe {
        async fn probe(&self, program: &Path) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !program.is_absolute() {
                return self.on_path;
            }
            match std::fs::read(program) {
                Ok(bytes) => bytes.starts_with(self.runnable_marker),
                Err(_) => false,
            }
        }
    }

    fn binary_body(marker: &str) -> Vec<u8> {
        let mut body = marker.as_bytes().to_vec();
        body.resize(BIG, 0);
        body
    }

    fn options(dir: &Path) -> ResolverOptions {
        ResolverOptions {
            binary_name: "cloudflared".into(),
            cache_dir: dir.to_path_buf(),
            download_base: DEFAULT_DOWNLOAD_BASE.into(),
        }
    }

    fn linux_amd64() -> Platform {
        Platform {
            os: Os::Linux,
            arch: Arch::Amd64,
        }
    }

    fn dir_entries(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .map(|rd| {
                rd.filter_map(Result::ok)
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_search_path_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(FakeFetcher::new(|_| Ok(binary_body("x"))));
        let prober = Arc::new(FakeProbe::new(true, b"x"));
        let resolver = BinaryResolver::with_parts(options(dir.path()), fetcher.clone(), prober)
            .with_platform(linux_amd64());

        let resolved = resolver.resolve().await.unwrap();
        assert_eq!(resolved.path, PathBuf::from("cloudflared"));
        assert_eq!(resolved.source, BinarySource::SearchPath);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cache_hit_skips_download() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("cloudflared"), binary_body("RUN")).unwrap();
        let fetcher = Arc::new(FakeFetcher::new(|_| Ok(binary_body("RUN"))));
        let prober = Arc::new(FakeProbe::new(false, b"RUN"));
        let resolver = BinaryResolver::with_parts(options(dir.path()), fetcher.clone(), prober)
            .with_platform(linux_amd64());

        let resolved = resolver.resolve().await.unwrap();
        assert_eq!(resolved.source, BinarySource::Cache);
        assert_eq!(resolved.path, dir.path().join("cloudflared"));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_download_primary() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(FakeFetcher::new(|_| Ok(binary_body("RUN"))));
        let prober = Arc::new(FakeProbe::new(false, b"RUN"));
        let resolver = BinaryResolver::with_parts(options(dir.path()), fetcher.clone(), prober)
            .with_platform(linux_amd64());

        let resolved = resolver.resolve().await.unwrap();
        assert_eq!(resolved.source, BinarySource::Download);
        assert_eq!(resolved.arch, "amd64");
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(dir_entries(dir.path()), vec!["cloudflared".to_string()]);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&resolved.path).unwrap().permissions().mode();
            assert_eq!(mode & 0o111, 0o111);
        }
    }

    #[tokio::test]
    async fn test_fallback_to_alternate_arch() {
        let dir = tempfile::tempdir().unwrap();
        // Primary (amd64) downloads fine but does not run; 386 does.
        let fetcher = Arc::new(FakeFetcher::new(|url| {
            if url.ends_with("-386") {
                Ok(binary_body("RUN-386"))
            } else {
                Ok(binary_body("BROKEN"))
            }
        }));
        let prober = Arc::new(FakeProbe::new(false, b"RUN"));
        let resolver = BinaryResolver::with_parts(options(dir.path()), fetcher.clone(), prober)
            .with_platform(linux_amd64());

        let resolved = resolver.resolve().await.unwrap();
        assert_eq!(resolved.path, dir.path().join("cloudflared"));
        assert_eq!(resolved.arch, "386");
        assert!(std::fs::read(&resolved.path).unwrap().starts_with(b"RUN-386"));

        let urls = fetcher.urls.lock().unwrap().clone();
        assert_eq!(urls.len(), 2);
        assert!(urls[0].ends_with("cloudflared-linux-amd64"));
        assert!(urls[1].ends_with("cloudflared-linux-386"));
    }

    #[tokio::test]
    async fn test_fallback_runs_only_once() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(FakeFetcher::new(|_| Ok(binary_body("BROKEN"))));
        let prober = Arc::new(FakeProbe::new(false, b"RUN"));
        let resolver = BinaryResolver::with_parts(options(dir.path()), fetcher.clone(), prober)
            .with_platform(linux_amd64());

        let err = resolver.resolve().await.unwrap_err();
        assert!(matches!(err, ResolutionError::Verification(_)), "{err}");
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
        assert!(dir_entries(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_static_check_skips_execution() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(FakeFetcher::new(|_| Ok(b"RUN but tiny".to_vec())));
        let prober = Arc::new(FakeProbe::new(false, b"RUN"));
        let resolver =
            BinaryResolver::with_parts(options(dir.path()), fetcher.clone(), prober.clone())
                .with_platform(linux_amd64());

        let err = resolver.resolve().await.unwrap_err();
        assert!(matches!(err, ResolutionError::Verification(_)));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
        // Only the search-path probe ran.
        assert_eq!(prober.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_partial_download_is_cleaned_up() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(FakeFetcher::new(|_| Err(vec![7u8; 4096])));
        let prober = Arc::new(FakeProbe::new(false, b"RUN"));
        let resolver = BinaryResolver::with_parts(options(dir.path()), fetcher.clone(), prober)
            .with_platform(linux_amd64());

        let err = resolver.resolve().await.unwrap_err();
        match err {
            ResolutionError::Download { url, reason } => {
                assert!(url.ends_with("cloudflared-linux-amd64"));
                assert!(reason.contains("reset"));
            }
            other => panic!("expected download error, got {other}"),
        }
        // Download failures do not fall back.
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert!(dir_entries(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_abandoned_download_leaves_no_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let prober = Arc::new(FakeProbe::new(false, b"RUN"));
        let resolver =
            BinaryResolver::with_parts(options(dir.path()), Arc::new(StalledFetcher), prober)
                .with_platform(linux_amd64());

        let mut resolve = Box::pin(resolver.resolve());
        let stalled = tokio::time::timeout(Duration::from_millis(200), &mut resolve).await;
        assert!(stalled.is_err());
        assert_eq!(dir_entries(dir.path()).len(), 1, "download should be in flight");

        drop(resolve);
        assert!(dir_entries(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_macos_archive_is_extracted() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(FakeFetcher::new(|_| {
            let payload = binary_body("RUN-darwin");
            let mut builder = tar::Builder::new(flate2::write::GzEncoder::new(
                Vec::new(),
                flate2::Compression::fast(),
            ));
            let mut header = tar::Header::new_gnu();
            header.set_size(payload.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, "cloudflared", payload.as_slice())
                .unwrap();
            Ok(builder.into_inner().unwrap().finish().unwrap())
        }));
        let prober = Arc::new(FakeProbe::new(false, b"RUN-darwin"));
        let resolver = BinaryResolver::with_parts(options(dir.path()), fetcher, prober)
            .with_platform(Platform {
                os: Os::MacOs,
                arch: Arch::Arm64,
            });

        let resolved = resolver.resolve().await.unwrap();
        assert_eq!(resolved.path, dir.path().join("cloudflared"));
        assert_eq!(std::fs::read(&resolved.path).unwrap().len(), BIG);
        assert_eq!(dir_entries(dir.path()), vec!["cloudflared".to_string()]);
    }

    #[tokio::test]
    async fn test_windows_magic_header_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let asset = asset_for(DEFAULT_DOWNLOAD_BASE, Os::Windows, Arch::Amd64).unwrap();

        let bad = dir.path().join("bad.exe");
        std::fs::write(&bad, binary_body("ELF")).unwrap();
        let err = verify_static(&bad, &asset).await.unwrap_err();
        assert!(err.contains("bad header"), "{err}");

        let good = dir.path().join("good.exe");
        std::fs::write(&good, binary_body("MZ")).unwrap();
        assert!(verify_static(&good, &asset).await.is_ok());
    }

    #[tokio::test]
    async fn test_unsupported_platform_after_path_miss() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(FakeFetcher::new(|_| Ok(binary_body("RUN"))));
        let prober = Arc::new(FakeProbe::new(false, b"RUN"));
        let resolver = BinaryResolver::with_parts(options(dir.path()), fetcher, prober)
            .with_platform(Platform {
                os: Os::MacOs,
                arch: Arch::X86,
            });
        assert!(matches!(
            resolver.resolve().await,
            Err(ResolutionError::UnsupportedPlatform { .. })
        ));
    }
}
