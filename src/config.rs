// Configuration module for community-subs
// Resolves platform directory paths and merges config.toml with environment overrides

use serde::Deserialize;
use std::path::PathBuf;

const APP_NAME: &str = "community-subs";
const CONFIG_FILENAME: &str = "config.toml";

pub const DEFAULT_PORT: u16 = 4949;
pub const DEFAULT_MAX_USER_ACTIVITIES: i64 = 15;
pub const DEFAULT_ANIME_MAPPING_URL: &str =
    "https://raw.githubusercontent.com/Fribb/anime-lists/master/anime-list-full.json";
pub const DEFAULT_KITSU_ADDON_URL: &str = "https://anime-kitsu.strem.fun";

/// TOML configuration file structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub server: ServerConfig,

    /// Directory paths (overrides platform defaults)
    pub paths: PathsConfig,

    /// Where uploaded subtitle files are kept
    pub storage: StorageConfig,

    /// Server-side credentials for subtitle providers
    pub providers: ProvidersConfig,

    pub metadata: MetadataConfig,

    pub limits: LimitsConfig,

    /// Kitsu/MAL to IMDb mapping
    pub anime: AnimeConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server port (default: 4949)
    pub port: u16,

    /// Bind address (default: 0.0.0.0)
    pub bind_address: String,

    /// Scheme used when building addon URLs (default: https)
    pub preferred_url_scheme: String,

    /// Public host name used in addon URLs. Falls back to the request Host header.
    pub public_host: Option<String>,

    /// Secret used for signing; required in production
    pub secret_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind_address: "0.0.0.0".to_string(),
            preferred_url_scheme: "https".to_string(),
            public_host: None,
            secret_key: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Override data directory (database location)
    pub data_dir: Option<PathBuf>,

    /// Override cache directory
    pub cache_dir: Option<PathBuf>,

    /// Override config directory
    pub config_dir: Option<PathBuf>,

    /// Override upload directory for the local storage backend
    pub upload_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Local,
    Cloudinary,
}

impl std::str::FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "cloudinary" => Ok(Self::Cloudinary),
            other => Err(format!("unknown storage backend '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub cloudinary_cloud_name: Option<String>,
    pub cloudinary_api_key: Option<String>,
    pub cloudinary_api_secret: Option<String>,

    /// Folder prefix for Cloudinary public ids
    pub subtitles_folder: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Local,
            cloudinary_cloud_name: None,
            cloudinary_api_key: None,
            cloudinary_api_secret: None,
            subtitles_folder: "community_subtitles".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    /// OpenSubtitles consumer API key (users log in with their own account)
    pub opensubtitles_api_key: Option<String>,

    /// User-Agent sent to OpenSubtitles
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    /// TMDB API key (optional, enables titles for IMDb content)
    pub tmdb_api_key: Option<String>,

    /// Kitsu addon base URL for anime metadata
    pub kitsu_addon_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Activities kept per user (default: 15)
    pub max_user_activities: i64,

    /// Largest accepted upload in bytes (default: 5 MiB)
    pub max_upload_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_user_activities: DEFAULT_MAX_USER_ACTIVITIES,
            max_upload_bytes: 5 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnimeConfig {
    pub mapping_url: String,

    /// Refresh the mapping table in the background on startup (default: true)
    pub update_on_startup: bool,
}

impl Default for AnimeConfig {
    fn default() -> Self {
        Self {
            mapping_url: DEFAULT_ANIME_MAPPING_URL.to_string(),
            update_on_startup: true,
        }
    }
}

/// Application paths resolved from env, config file and platform directories
#[derive(Debug, Clone)]
pub struct AppPaths {
    /// Directory for configuration files (config.toml)
    pub config_dir: PathBuf,

    /// Directory for persistent data (database)
    pub data_dir: PathBuf,

    pub cache_dir: PathBuf,

    /// Root of the local subtitle store
    pub upload_dir: PathBuf,
}

impl AppPaths {
    /// Create application paths
    ///
    /// Priority order:
    /// 1. Environment variables (COMMUNITY_SUBS_CONFIG_DIR, COMMUNITY_SUBS_DATA_DIR,
    ///    COMMUNITY_SUBS_CACHE_DIR, UPLOAD_FOLDER)
    /// 2. Config file overrides
    /// 3. Platform directories
    /// 4. Current directory fallback
    pub fn new(config_overrides: &PathsConfig) -> Self {
        let config_dir = Self::resolve(
            "COMMUNITY_SUBS_CONFIG_DIR",
            &config_overrides.config_dir,
            dirs::config_dir(),
            Self::cwd(),
        );
        let data_dir = Self::resolve(
            "COMMUNITY_SUBS_DATA_DIR",
            &config_overrides.data_dir,
            dirs::data_dir(),
            Self::cwd(),
        );
        let cache_dir = Self::resolve(
            "COMMUNITY_SUBS_CACHE_DIR",
            &config_overrides.cache_dir,
            dirs::cache_dir(),
            Self::cwd().join("cache"),
        );
        let upload_dir = std::env::var("UPLOAD_FOLDER")
            .ok()
            .map(PathBuf::from)
            .or_else(|| config_overrides.upload_dir.clone())
            .unwrap_or_else(|| data_dir.join("uploads"));

        Self {
            config_dir,
            data_dir,
            cache_dir,
            upload_dir,
        }
    }

    /// Everything under the current directory (portable mode)
    pub fn current_dir() -> Self {
        let cwd = Self::cwd();
        Self {
            config_dir: cwd.clone(),
            data_dir: cwd.clone(),
            cache_dir: cwd.join("cache"),
            upload_dir: std::env::var("UPLOAD_FOLDER")
                .map(PathBuf::from)
                .unwrap_or_else(|_| cwd.join("uploads")),
        }
    }

    fn cwd() -> PathBuf {
        std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
    }

    fn resolve(
        env_var: &str,
        config_override: &Option<PathBuf>,
        platform_dir: Option<PathBuf>,
        fallback: PathBuf,
    ) -> PathBuf {
        if let Ok(path) = std::env::var(env_var) {
            return PathBuf::from(path);
        }

        if let Some(ref path) = config_override {
            return path.clone();
        }

        if let Some(dir) = platform_dir {
            return dir.join(APP_NAME);
        }

        fallback
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("community-subs.db")
    }

    /// Get the database URL for SQLite
    pub fn database_url(&self) -> String {
        format!("sqlite:{}?mode=rwc", self.database_path().display())
    }

    pub fn config_file_path(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILENAME)
    }

    /// Ensure all directories exist
    pub async fn ensure_dirs(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.config_dir).await?;
        tokio::fs::create_dir_all(&self.data_dir).await?;
        tokio::fs::create_dir_all(&self.cache_dir).await?;
        tokio::fs::create_dir_all(&self.upload_dir).await?;
        Ok(())
    }

    pub fn log_paths(&self) {
        tracing::info!("Configuration directory: {}", self.config_dir.display());
        tracing::info!("Data directory: {}", self.data_dir.display());
        tracing::info!("Cache directory: {}", self.cache_dir.display());
        tracing::info!("Upload directory: {}", self.upload_dir.display());
        tracing::debug!("Database path: {}", self.database_path().display());
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new(&PathsConfig::default())
    }
}

/// Application configuration - combines TOML file with environment overrides
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub paths: AppPaths,
    pub port: u16,
    pub bind_address: String,
    pub preferred_url_scheme: String,
    pub public_host: Option<String>,
    pub secret_key: Option<String>,
    pub storage: StorageConfig,
    pub opensubtitles_api_key: Option<String>,
    pub opensubtitles_user_agent: String,
    pub tmdb_api_key: Option<String>,
    pub kitsu_addon_url: String,
    pub max_user_activities: i64,
    pub max_upload_bytes: usize,
    pub anime: AnimeConfig,
}

impl AppConfig {
    /// Load configuration from TOML file and environment
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. TOML config file
    /// 3. Default values
    pub fn load() -> Self {
        let portable_mode = std::env::var("COMMUNITY_SUBS_PORTABLE")
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
            .unwrap_or(false);

        let config_dir = if portable_mode {
            tracing::info!("Running in portable mode (using current directory)");
            AppPaths::cwd()
        } else {
            Self::find_config_dir()
        };

        let config_file = Self::load_config_file(&config_dir);
        let paths = if portable_mode {
            AppPaths::current_dir()
        } else {
            AppPaths::new(&config_file.paths)
        };

        Self::build(config_file, paths)
    }

    fn find_config_dir() -> PathBuf {
        if let Ok(path) = std::env::var("COMMUNITY_SUBS_CONFIG_DIR") {
            return PathBuf::from(path);
        }

        if let Some(dir) = dirs::config_dir() {
            return dir.join(APP_NAME);
        }

        AppPaths::cwd()
    }

    /// Load and parse the TOML config file
    fn load_config_file(config_dir: &std::path::Path) -> ConfigFile {
        let config_path = config_dir.join(CONFIG_FILENAME);

        if !config_path.exists() {
            tracing::debug!(
                "No config file found at {}, using defaults",
                config_path.display()
            );
            return ConfigFile::default();
        }

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded configuration from {}", config_path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to parse config file {}: {}. Using defaults.",
                        config_path.display(),
                        e
                    );
                    ConfigFile::default()
                }
            },
            Err(e) => {
                tracing::warn!(
                    "Failed to read config file {}: {}. Using defaults.",
                    config_path.display(),
                    e
                );
                ConfigFile::default()
            }
        }
    }

    /// Build configuration from config file with environment overrides
    fn build(config_file: ConfigFile, paths: AppPaths) -> Self {
        let port = Self::env_port().unwrap_or(config_file.server.port);

        let bind_address = std::env::var("COMMUNITY_SUBS_BIND_ADDRESS")
            .unwrap_or_else(|_| config_file.server.bind_address.clone());

        let preferred_url_scheme = std::env::var("PREFERRED_URL_SCHEME")
            .unwrap_or_else(|_| config_file.server.preferred_url_scheme.clone());

        let mut storage = config_file.storage;
        if let Ok(backend) = std::env::var("STORAGE_BACKEND") {
            match backend.parse() {
                Ok(parsed) => storage.backend = parsed,
                Err(e) => tracing::warn!("Ignoring STORAGE_BACKEND: {}", e),
            }
        }
        storage.cloudinary_cloud_name =
            env_or("CLOUDINARY_CLOUD_NAME", storage.cloudinary_cloud_name);
        storage.cloudinary_api_key = env_or("CLOUDINARY_API_KEY", storage.cloudinary_api_key);
        storage.cloudinary_api_secret =
            env_or("CLOUDINARY_API_SECRET", storage.cloudinary_api_secret);
        if let Ok(folder) = std::env::var("CLOUDINARY_SUBTITLES_FOLDER") {
            storage.subtitles_folder = folder;
        }

        let max_user_activities = std::env::var("MAX_USER_ACTIVITIES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(config_file.limits.max_user_activities);

        Self {
            paths,
            port,
            bind_address,
            preferred_url_scheme,
            public_host: env_or("PUBLIC_HOST", config_file.server.public_host),
            secret_key: env_or("SECRET_KEY", config_file.server.secret_key),
            storage,
            opensubtitles_api_key: env_or(
                "OPENSUBTITLES_API_KEY",
                config_file.providers.opensubtitles_api_key,
            ),
            opensubtitles_user_agent: env_or(
                "OPENSUBTITLES_USER_AGENT",
                config_file.providers.user_agent,
            )
            .unwrap_or_else(|| format!("CommunitySubs v{}", env!("CARGO_PKG_VERSION"))),
            tmdb_api_key: env_or("TMDB_API_KEY", config_file.metadata.tmdb_api_key),
            kitsu_addon_url: env_or("KITSU_ADDON_URL", config_file.metadata.kitsu_addon_url)
                .unwrap_or_else(|| DEFAULT_KITSU_ADDON_URL.to_string()),
            max_user_activities,
            max_upload_bytes: config_file.limits.max_upload_bytes,
            anime: config_file.anime,
        }
    }

    fn env_port() -> Option<u16> {
        std::env::var("COMMUNITY_SUBS_PORT")
            .or_else(|_| std::env::var("PORT"))
            .ok()
            .and_then(|p| p.parse().ok())
    }

    /// Get the database URL, with override from DATABASE_URL env var
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL").unwrap_or_else(|_| self.paths.database_url())
    }

    /// Base URL for links handed to Stremio. `request_host` is the Host header.
    pub fn base_url(&self, request_host: Option<&str>) -> String {
        let host = self
            .public_host
            .as_deref()
            .or(request_host)
            .unwrap_or("localhost");
        format!(
            "{}://{}",
            self.preferred_url_scheme,
            host.trim_end_matches('/')
        )
    }

    /// Log configuration status
    pub fn log_config(&self) {
        self.paths.log_paths();
        tracing::info!("Server listening on {}:{}", self.bind_address, self.port);

        match self.storage.backend {
            StorageBackend::Local => tracing::info!("Subtitle storage: local"),
            StorageBackend::Cloudinary => tracing::info!(
                "Subtitle storage: cloudinary (folder '{}')",
                self.storage.subtitles_folder
            ),
        }

        if self.opensubtitles_api_key.is_none() {
            tracing::warn!("OPENSUBTITLES_API_KEY is not set, OpenSubtitles will be unavailable");
        }

        if self.tmdb_api_key.is_some() {
            tracing::info!("Metadata providers: TMDB + Kitsu");
        } else {
            tracing::info!("Metadata providers: Kitsu only");
            tracing::info!("Hint: Add tmdb_api_key to config.toml or set TMDB_API_KEY env var");
        }

        if self.secret_key.is_none() {
            tracing::warn!("SECRET_KEY is not set");
        }

        tracing::debug!("Max user activities: {}", self.max_user_activities);
    }
}

#[cfg(test)]
impl AppConfig {
    /// Defaults rooted at a scratch directory, without reading env or files
    pub fn for_tests(root: &std::path::Path) -> Self {
        let paths = AppPaths {
            config_dir: root.to_path_buf(),
            data_dir: root.to_path_buf(),
            cache_dir: root.join("cache"),
            upload_dir: root.join("uploads"),
        };
        let file = ConfigFile::default();
        Self {
            paths,
            port: file.server.port,
            bind_address: file.server.bind_address,
            preferred_url_scheme: "http".to_string(),
            public_host: None,
            secret_key: Some("test".to_string()),
            storage: file.storage,
            opensubtitles_api_key: None,
            opensubtitles_user_agent: "CommunitySubs test".to_string(),
            tmdb_api_key: None,
            kitsu_addon_url: DEFAULT_KITSU_ADDON_URL.to_string(),
            max_user_activities: file.limits.max_user_activities,
            max_upload_bytes: file.limits.max_upload_bytes,
            anime: file.anime,
        }
    }
}

fn env_or(var: &str, fallback: Option<String>) -> Option<String> {
    std::env::var(var)
        .ok()
        .filter(|v| !v.is_empty())
        .or(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_dir_paths() {
        let paths = AppPaths::current_dir();
        assert!(paths.config_dir.is_absolute() || paths.config_dir == PathBuf::from("."));
        assert!(paths.cache_dir.ends_with("cache"));
    }

    #[test]
    fn test_database_url_format() {
        let paths = AppPaths::current_dir();
        let url = paths.database_url();
        assert!(url.starts_with("sqlite:"));
        assert!(url.ends_with("community-subs.db?mode=rwc"));
    }

    #[test]
    fn test_default_config_file() {
        let config = ConfigFile::default();
        assert_eq!(config.server.port, 4949);
        assert_eq!(config.server.preferred_url_scheme, "https");
        assert_eq!(config.storage.backend, StorageBackend::Local);
        assert_eq!(config.storage.subtitles_folder, "community_subtitles");
        assert_eq!(config.limits.max_user_activities, 15);
        assert!(config.anime.update_on_startup);
    }

    #[test]
    fn test_parse_config_toml() {
        let toml_str = r#"
[server]
port = 9000
public_host = "subs.example.org"

[storage]
backend = "cloudinary"
cloudinary_cloud_name = "demo"

[providers]
opensubtitles_api_key = "os_key"

[limits]
max_user_activities = 30

[paths]
upload_dir = "/srv/subs"
"#;
        let config: ConfigFile = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.public_host.as_deref(), Some("subs.example.org"));
        assert_eq!(config.storage.backend, StorageBackend::Cloudinary);
        assert_eq!(config.storage.cloudinary_cloud_name.as_deref(), Some("demo"));
        assert_eq!(
            config.providers.opensubtitles_api_key.as_deref(),
            Some("os_key")
        );
        assert_eq!(config.limits.max_user_activities, 30);
        assert_eq!(config.paths.upload_dir, Some(PathBuf::from("/srv/subs")));
    }

    #[test]
    fn test_partial_config_toml() {
        let toml_str = r#"
[metadata]
tmdb_api_key = "abc"
"#;
        let config: ConfigFile = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.port, 4949);
        assert_eq!(config.metadata.tmdb_api_key.as_deref(), Some("abc"));
        assert_eq!(config.limits.max_upload_bytes, 5 * 1024 * 1024);
    }

    #[test]
    fn test_storage_backend_from_str() {
        assert_eq!("Cloudinary".parse::<StorageBackend>(), Ok(StorageBackend::Cloudinary));
        assert_eq!(" local ".parse::<StorageBackend>(), Ok(StorageBackend::Local));
        assert!("s3".parse::<StorageBackend>().is_err());
    }

    #[test]
    fn test_base_url_prefers_public_host() {
        let dir = std::env::temp_dir();
        let mut config = AppConfig::for_tests(&dir);
        assert_eq!(config.base_url(Some("127.0.0.1:4949")), "http://127.0.0.1:4949");
        config.public_host = Some("subs.example.org/".to_string());
        assert_eq!(config.base_url(Some("ignored")), "http://subs.example.org");
    }
}
