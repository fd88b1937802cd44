//! Stage parameter parsing
//!
//! Parses `--param key=value` arguments and YAML parameter files into the
//! untyped [`Params`] map. Typing against the stage schema happens later, when
//! the stage configuration is built.

use astroca_core::{ParamValue, Params};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Empty parameter")]
    EmptyInput,

    #[error("Expected key=value, got: {input}")]
    MissingSeparator { input: String },

    #[error("Empty parameter name in: {input}")]
    EmptyKey { input: String },

    #[error("Parameter '{key}' given more than once")]
    DuplicateKey { key: String },

    #[error("Failed to read parameter file {path}: {message}")]
    ParamsFile { path: String, message: String },
}

/// Parse one `key=value` argument
///
/// # Value typing
///
/// ```text
/// "radius=2"          → Int(2)
/// "radius=1.5"        → Float(1.5)
/// "save=true"         → Bool(true)
/// "border_mode=wrap"  → Str("wrap")
/// "label="            → Str("")
/// ```
///
/// Only the first `=` separates key and value. Non-finite literals such as
/// `nan` or `inf` stay strings.
pub fn parse_param(input: &str) -> Result<(String, ParamValue), ParseError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(ParseError::EmptyInput);
    }

    let (key, value) = input
        .split_once('=')
        .ok_or_else(|| ParseError::MissingSeparator {
            input: input.to_string(),
        })?;
    let key = key.trim();
    if key.is_empty() {
        return Err(ParseError::EmptyKey {
            input: input.to_string(),
        });
    }

    Ok((key.to_string(), parse_value(value.trim())))
}

fn parse_value(value: &str) -> ParamValue {
    if let Ok(int) = value.parse::<i64>() {
        ParamValue::Int(int)
    } else if let Some(float) = value.parse::<f64>().ok().filter(|f| f.is_finite()) {
        ParamValue::Float(float)
    } else if let Ok(flag) = value.parse::<bool>() {
        ParamValue::Bool(flag)
    } else {
        ParamValue::Str(value.to_string())
    }
}

/// Parse every `--param` argument; a key may appear only once
pub fn parse_params<S: AsRef<str>>(inputs: &[S]) -> Result<Params, ParseError> {
    let mut params = Params::new();
    for input in inputs {
        let (key, value) = parse_param(input.as_ref())?;
        if params.insert(key.clone(), value).is_some() {
            return Err(ParseError::DuplicateKey { key });
        }
    }
    Ok(params)
}

/// Read a flat YAML mapping of parameter names to scalars
pub fn load_params_file(path: &Path) -> Result<Params, ParseError> {
    let file_error = |message: String| ParseError::ParamsFile {
        path: path.display().to_string(),
        message,
    };
    let contents = std::fs::read_to_string(path).map_err(|e| file_error(e.to_string()))?;
    if contents.trim().is_empty() {
        return Ok(Params::new());
    }
    serde_yaml::from_str(&contents).map_err(|e| file_error(e.to_string()))
}

/// File parameters overridden by command-line parameters
pub fn merge_params(file: Params, cli: Params) -> Params {
    let mut merged = file;
    merged.extend(cli);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_integer_value() {
        let (key, value) = parse_param("radius=2").unwrap();
        assert_eq!(key, "radius");
        assert_eq!(value, ParamValue::Int(2));
    }

    #[test]
    fn test_float_value() {
        assert_eq!(
            parse_param("std_noise=1.1696291").unwrap().1,
            ParamValue::Float(1.1696291)
        );
    }

    #[test]
    fn test_non_finite_literals_are_strings() {
        for literal in ["nan", "inf", "-inf", "NaN", "1e999"] {
            assert_eq!(
                parse_param(&format!("label={literal}")).unwrap().1,
                ParamValue::Str(literal.to_string())
            );
        }
    }

    #[test]
    fn test_bool_and_string_values() {
        assert_eq!(parse_param("flag=true").unwrap().1, ParamValue::Bool(true));
        assert_eq!(
            parse_param("border_mode=reflect").unwrap().1,
            ParamValue::Str("reflect".to_string())
        );
    }

    #[test]
    fn test_whitespace_handling() {
        let (key, value) = parse_param("  x_min = 12 ").unwrap();
        assert_eq!(key, "x_min");
        assert_eq!(value, ParamValue::Int(12));
    }

    #[test]
    fn test_only_first_separator_splits() {
        let (key, value) = parse_param("label=a=b").unwrap();
        assert_eq!(key, "label");
        assert_eq!(value, ParamValue::Str("a=b".to_string()));
    }

    #[test]
    fn test_empty_value_is_string() {
        assert_eq!(
            parse_param("label=").unwrap().1,
            ParamValue::Str(String::new())
        );
    }

    #[test]
    fn test_empty_input() {
        assert!(matches!(parse_param("  "), Err(ParseError::EmptyInput)));
    }

    #[test]
    fn test_missing_separator() {
        assert!(matches!(
            parse_param("radius"),
            Err(ParseError::MissingSeparator { .. })
        ));
    }

    #[test]
    fn test_empty_key() {
        assert!(matches!(
            parse_param("=3"),
            Err(ParseError::EmptyKey { .. })
        ));
    }

    #[test]
    fn test_duplicate_key() {
        let result = parse_params(&["radius=1", "radius=2"]);
        assert!(matches!(
            result.unwrap_err(),
            ParseError::DuplicateKey { key } if key == "radius"
        ));
    }

    #[test]
    fn test_params_file_and_merge() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("params.yaml");
        std::fs::write(&path, "radius: 2\nborder_mode: wrap\nstd_noise: 1.5\n").unwrap();

        let file = load_params_file(&path).unwrap();
        assert_eq!(file["radius"], ParamValue::Int(2));
        assert_eq!(file["std_noise"], ParamValue::Float(1.5));

        let cli = parse_params(&["radius=3"]).unwrap();
        let merged = merge_params(file, cli);
        assert_eq!(merged["radius"], ParamValue::Int(3));
        assert_eq!(merged["border_mode"], ParamValue::Str("wrap".to_string()));
    }

    #[test]
    fn test_params_file_errors() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing.yaml");
        assert!(matches!(
            load_params_file(&missing),
            Err(ParseError::ParamsFile { .. })
        ));

        let nested = dir.path().join("nested.yaml");
        std::fs::write(&nested, "- radius\n- 2\n").unwrap();
        assert!(matches!(
            load_params_file(&nested),
            Err(ParseError::ParamsFile { .. })
        ));
    }

    #[test]
    fn test_empty_params_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.yaml");
        std::fs::write(&path, "\n").unwrap();
        assert!(load_params_file(&path).unwrap().is_empty());
    }
}
