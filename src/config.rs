use std::collections::HashMap;
use std::fs;
use std::path::Path;

use time::PrimitiveDateTime;

use crate::errors::ConfigError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetCategory {
    File,
    Url,
}

/// Parsed `analysis.conf`. Immutable after `load()`; passed around the
/// supervisor and the IPC session by `Arc`.
#[derive(Clone, Debug)]
pub struct AnalysisConfig {
    pub category: TargetCategory,
    pub target: String,
    pub file_name: Option<String>,
    pub file_type: Option<String>,
    pub package: Option<String>,
    pub timeout: u64,
    pub clock: PrimitiveDateTime,
    pub enforce_timeout: bool,
    pub terminate_processes: bool,
    pub options: HashMap<String, String>,
}

impl AnalysisConfig {
    /// `dll` is the default monitor library path, lifted out of the
    /// free-form options map.
    pub fn default_dll(&self) -> Option<&str> {
        self.options.get("dll").map(String::as_str)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let mut fields: HashMap<String, String> = HashMap::new();
        let mut options: HashMap<String, String> = HashMap::new();

        for (i, line) in raw.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (key, value) = line
                .split_once('=')
                .ok_or(ConfigError::Malformed { line: i + 1 })?;
            let key = key.trim();
            let value = value.trim().to_string();

            match key.strip_prefix("options.") {
                Some(opt_key) => {
                    options.insert(opt_key.to_string(), value);
                }
                None => {
                    fields.insert(key.to_string(), value);
                }
            }
        }

        Self::from_fields(fields, options)
    }

    fn from_fields(
        mut fields: HashMap<String, String>,
        options: HashMap<String, String>,
    ) -> Result<Self, ConfigError> {
        let category = match fields
            .remove("category")
            .ok_or(ConfigError::MissingKey("category"))?
            .as_str()
        {
            "file" => TargetCategory::File,
            "url" => TargetCategory::Url,
            other => {
                return Err(ConfigError::InvalidValue {
                    key: "category",
                    value: other.to_string(),
                })
            }
        };

        let target = fields
            .remove("target")
            .ok_or(ConfigError::MissingKey("target"))?;

        let timeout_raw = fields
            .remove("timeout")
            .ok_or(ConfigError::MissingKey("timeout"))?;
        let timeout: u64 = timeout_raw
            .parse()
            .map_err(|_| ConfigError::InvalidValue {
                key: "timeout",
                value: timeout_raw,
            })?;
        if timeout == 0 {
            return Err(ConfigError::InvalidValue {
                key: "timeout",
                value: "0".to_string(),
            });
        }

        let clock_raw = fields
            .remove("clock")
            .ok_or(ConfigError::MissingKey("clock"))?;
        let format = time::macros::format_description!(
            "[year][month][day]T[hour]:[minute]:[second]"
        );
        let clock = PrimitiveDateTime::parse(&clock_raw, &format).map_err(|_| {
            ConfigError::InvalidValue {
                key: "clock",
                value: clock_raw,
            }
        })?;

        let enforce_timeout = fields
            .remove("enforce_timeout")
            .map(|v| parse_bool(&v))
            .unwrap_or(false);
        let terminate_processes = fields
            .remove("terminate_processes")
            .map(|v| parse_bool(&v))
            .unwrap_or(false);

        Ok(AnalysisConfig {
            category,
            target,
            file_name: fields.remove("file_name"),
            file_type: fields.remove("file_type"),
            package: fields.remove("package"),
            timeout,
            clock,
            enforce_timeout,
            terminate_processes,
            options,
        })
    }

    /// Resolves the final target: a file sample joins the configured file
    /// name onto the temp directory, a URL sample is used verbatim.
    pub fn resolve_target(&self, temp_dir: &Path) -> String {
        match self.category {
            TargetCategory::File => {
                let file_name = self.file_name.as_deref().unwrap_or("sample.bin");
                temp_dir.join(file_name).to_string_lossy().into_owned()
            }
            TargetCategory::Url => self.target.clone(),
        }
    }
}

fn parse_bool(raw: &str) -> bool {
    matches!(raw.trim(), "1" | "true" | "yes" | "on")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_conf(body: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(body.as_bytes()).unwrap();
        f
    }

    #[test]
    fn parses_a_full_file_sample_config() {
        let f = write_conf(
            "category=file\n\
             target=x.exe\n\
             file_name=x.exe\n\
             file_type=pe32\n\
             timeout=10\n\
             clock=20260726T00:00:00\n\
             enforce_timeout=0\n\
             terminate_processes=1\n\
             options.dll=monitor.dll\n",
        );

        let cfg = AnalysisConfig::load(f.path()).unwrap();
        assert_eq!(cfg.category, TargetCategory::File);
        assert_eq!(cfg.timeout, 10);
        assert!(!cfg.enforce_timeout);
        assert!(cfg.terminate_processes);
        assert_eq!(cfg.default_dll(), Some("monitor.dll"));
    }

    #[test]
    fn parses_a_url_sample_config() {
        let f = write_conf(
            "category=url\n\
             target=http://example.com\n\
             timeout=120\n\
             clock=20260726T00:00:00\n",
        );

        let cfg = AnalysisConfig::load(f.path()).unwrap();
        assert_eq!(cfg.category, TargetCategory::Url);
        assert_eq!(cfg.resolve_target(Path::new("/tmp")), "http://example.com");
    }

    #[test]
    fn missing_timeout_is_an_error() {
        let f = write_conf("category=file\ntarget=x.exe\nclock=20260726T00:00:00\n");
        assert!(matches!(
            AnalysisConfig::load(f.path()),
            Err(ConfigError::MissingKey("timeout"))
        ));
    }

    #[test]
    fn non_numeric_timeout_is_an_error() {
        let f = write_conf(
            "category=file\ntarget=x.exe\ntimeout=soon\nclock=20260726T00:00:00\n",
        );
        assert!(matches!(
            AnalysisConfig::load(f.path()),
            Err(ConfigError::InvalidValue { key: "timeout", .. })
        ));
    }

    #[test]
    fn malformed_line_is_rejected() {
        let f = write_conf("category=file\nnotakeyvalueline\n");
        assert!(matches!(
            AnalysisConfig::load(f.path()),
            Err(ConfigError::Malformed { line: 2 })
        ));
    }
}
