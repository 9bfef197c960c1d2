//! Doctor - Tokenizer backend and configuration checks

use anyhow::Result;
use serde::Serialize;
use std::path::Path;

use crate::config::{Config, CONFIG_FILE_NAME};
use crate::core::render::OutputFormat;
use crate::core::tokenizer::{backend_status, TokenEstimator, TokenModel};

/// Outcome of one check
#[derive(Debug, Clone, Serialize)]
pub struct CheckStatus {
    pub name: String,
    pub ok: bool,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl CheckStatus {
    fn line(&self) -> String {
        let mark = if self.ok { "✓" } else { "✗" };
        let required = if self.required { "required" } else { "optional" };
        match &self.detail {
            Some(detail) => format!("{} {} ({}) - {}", mark, self.name, required, detail),
            None => format!("{} {} ({})", mark, self.name, required),
        }
    }
}

/// Run every check against `root` and the optional explicit config path
pub fn run_checks(root: &Path, config_path: Option<&Path>, model: TokenModel) -> Vec<CheckStatus> {
    let mut checks: Vec<CheckStatus> = backend_status()
        .into_iter()
        .map(|backend| CheckStatus {
            name: format!("tokenizer {}", backend.name),
            ok: backend.available,
            required: false,
            detail: backend
                .error
                .or_else(|| Some("exact counts available".to_string())),
        })
        .collect();

    let estimator = TokenEstimator::new(model);
    checks.push(CheckStatus {
        name: format!("model {}", model),
        ok: true,
        required: true,
        detail: Some(if estimator.is_exact() {
            format!("exact ({})", estimator.encoding_name())
        } else {
            "approximate (heuristic fallback)".to_string()
        }),
    });

    let discovered = root.join(CONFIG_FILE_NAME);
    let shown = config_path.unwrap_or(&discovered);
    let config_check = match Config::load(config_path, root) {
        Ok(_) if config_path.is_none() && !discovered.is_file() => CheckStatus {
            name: "config".to_string(),
            ok: true,
            required: false,
            detail: Some("no config file, using defaults".to_string()),
        },
        Ok(_) => CheckStatus {
            name: "config".to_string(),
            ok: true,
            required: false,
            detail: Some(format!("loaded {}", shown.display())),
        },
        Err(e) => CheckStatus {
            name: "config".to_string(),
            ok: false,
            required: true,
            detail: Some(e.to_string()),
        },
    };
    checks.push(config_check);

    checks
}

/// Run the doctor command
pub fn run_doctor(
    root: &Path,
    config_path: Option<&Path>,
    model: TokenModel,
    format: OutputFormat,
    pretty: bool,
) -> Result<()> {
    let checks = run_checks(root, config_path, model);

    let output = match format {
        OutputFormat::Jsonl => checks
            .iter()
            .filter_map(|c| serde_json::to_string(c).ok())
            .collect::<Vec<_>>()
            .join("\n"),
        OutputFormat::Json if pretty => serde_json::to_string_pretty(&checks)?,
        OutputFormat::Json => serde_json::to_string(&checks)?,
        OutputFormat::Markdown | OutputFormat::Tree => checks
            .iter()
            .map(|c| format!("- {}", c.line()))
            .collect::<Vec<_>>()
            .join("\n"),
    };
    println!("{}", output);

    if checks.iter().any(|c| c.required && !c.ok) {
        eprintln!("\n⚠️  Some required checks failed!");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_run_checks_defaults() {
        let temp = tempdir().unwrap();
        let checks = run_checks(temp.path(), None, TokenModel::Heuristic);

        let names: Vec<_> = checks.iter().map(|c| c.name.as_str()).collect();
        assert!(names.iter().any(|n| n.contains("cl100k_base")));
        assert!(names.iter().any(|n| n.contains("o200k_base")));
        assert!(names.contains(&"config"));

        let config = checks.iter().find(|c| c.name == "config").unwrap();
        assert!(config.ok);
        assert!(config.detail.as_deref().unwrap().contains("defaults"));
    }

    #[test]
    fn test_invalid_config_fails_check() {
        let temp = tempdir().unwrap();
        std::fs::write(temp.path().join(CONFIG_FILE_NAME), "[cache]\ntoken_budget = 0\n").unwrap();
        let checks = run_checks(temp.path(), None, TokenModel::Heuristic);
        let config = checks.iter().find(|c| c.name == "config").unwrap();
        assert!(!config.ok);
        assert!(config.required);
    }

    #[test]
    fn test_check_line() {
        let check = CheckStatus {
            name: "config".to_string(),
            ok: false,
            required: true,
            detail: Some("bad".to_string()),
        };
        assert_eq!(check.line(), "✗ config (required) - bad");
    }
}
