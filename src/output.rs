//! Rendering and persistence of settings snapshots.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::debug;

use crate::settings::Settings;

/// Renders settings as JSON, indented when `pretty` is set.
pub fn render(settings: &Settings, pretty: bool) -> Result<String> {
    let rendered = if pretty {
        serde_json::to_string_pretty(settings)?
    } else {
        serde_json::to_string(settings)?
    };
    Ok(rendered)
}

/// Writes settings as JSON to `path`, replacing any previous contents.
///
/// Creates missing parent directories.
pub fn write_json(path: &str, settings: &Settings, pretty: bool) -> Result<()> {
    if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }

    let mut body = render(settings, pretty)?;
    body.push('\n');
    fs::write(path, body).with_context(|| format!("Failed to write settings to {path}"))?;
    debug!(path, keys = settings.len(), "Settings written");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::capture_logs;
    use std::env;

    fn temp_path(name: &str) -> String {
        format!("{}/{}", env::temp_dir().display(), name)
    }

    #[test]
    fn test_write_json_logs_no_values() {
        let path = temp_path("ssm_settings_test_logs.json");
        let settings = Settings::from_json(r#"{"db_password":"hunter2"}"#).unwrap();

        let (logs, _guard) = capture_logs();
        write_json(&path, &settings, false).unwrap();

        let logged = logs.contents();
        assert!(logged.contains("Settings written"));
        assert!(!logged.contains("hunter2"));

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_render_compact_and_pretty() {
        let settings = Settings::from_json(r#"{"theme":"dark"}"#).unwrap();

        assert_eq!(render(&settings, false).unwrap(), r#"{"theme":"dark"}"#);
        assert_eq!(
            render(&settings, true).unwrap(),
            "{\n  \"theme\": \"dark\"\n}"
        );
        assert_eq!(render(&Settings::empty(), false).unwrap(), "{}");
    }

    #[test]
    fn test_write_json_replaces_contents() {
        let path = temp_path("ssm_settings_test_replace.json");
        let _ = fs::remove_file(&path);

        let first = Settings::from_json(r#"{"a":1}"#).unwrap();
        let second = Settings::from_json(r#"{"b":2}"#).unwrap();
        write_json(&path, &first, false).unwrap();
        write_json(&path, &second, false).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, "{\"b\":2}\n");

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_write_json_creates_parent_dirs() {
        let dir = temp_path("ssm_settings_test_nested");
        let _ = fs::remove_dir_all(&dir);
        let path = format!("{dir}/out/settings.json");

        write_json(&path, &Settings::empty(), true).unwrap();
        assert!(Path::new(&path).exists());

        fs::remove_dir_all(&dir).unwrap();
    }
}
