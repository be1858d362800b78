//! Configuration management for the equation render cache

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

/// One year, the lifetime of a content-addressed image
pub const DEFAULT_CACHE_MAX_AGE: u64 = 31_536_000;

#[derive(Debug, Clone)]
pub struct Config {
    pub cache: CacheConfig,
    pub snapshot: SnapshotConfig,
    pub http: HttpConfig,
}

/// Rendered image cache settings
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Directory holding one `<digest>.png` per rendered equation
    pub dir: PathBuf,
    /// Rendered images kept in memory in front of the directory
    pub memory_entries: usize,
}

/// Per-document fragment snapshot settings
#[derive(Debug, Clone)]
pub struct SnapshotConfig {
    /// Initial compaction watermark, and the floor it never drops below
    pub min_watermark: usize,
}

/// Fetch endpoint settings
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// `Cache-Control: max-age` for served images, in seconds
    pub cache_max_age: u64,
    /// Prefix of the image URL embedded in rendered `<img>` tags
    pub url_base: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            dir: env::temp_dir().join("mathml-cache"),
            memory_entries: 256,
        }
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        SnapshotConfig { min_watermark: 4 }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        HttpConfig {
            cache_max_age: DEFAULT_CACHE_MAX_AGE,
            url_base: "../plugins-dispatcher".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            cache: CacheConfig::default(),
            snapshot: SnapshotConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the environment (and a `.env` file if present)
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let defaults = Config::default();

        Config {
            cache: CacheConfig {
                dir: env::var("MATHML_CACHE_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.cache.dir),
                memory_entries: parse_var("MATHML_MEMORY_CACHE_ENTRIES", defaults.cache.memory_entries),
            },
            snapshot: SnapshotConfig {
                min_watermark: parse_var("MATHML_MIN_WATERMARK", defaults.snapshot.min_watermark),
            },
            http: HttpConfig {
                cache_max_age: parse_var("MATHML_CACHE_MAX_AGE", defaults.http.cache_max_age),
                url_base: env::var("MATHML_URL_BASE").unwrap_or(defaults.http.url_base),
            },
        }
    }
}

fn parse_var<T: FromStr>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(var = name, value = %raw, "Invalid value, using default");
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.snapshot.min_watermark, 4);
        assert_eq!(config.http.cache_max_age, 31_536_000);
        assert!(config.cache.dir.ends_with("mathml-cache"));
    }

    #[test]
    fn test_parse_var_falls_back() {
        env::set_var("MATHML_TEST_PARSE_VAR", "not-a-number");
        assert_eq!(parse_var("MATHML_TEST_PARSE_VAR", 7usize), 7);
        env::set_var("MATHML_TEST_PARSE_VAR", " 12 ");
        assert_eq!(parse_var("MATHML_TEST_PARSE_VAR", 7usize), 12);
        env::remove_var("MATHML_TEST_PARSE_VAR");
        assert_eq!(parse_var("MATHML_TEST_PARSE_VAR", 7usize), 7);
    }
}
