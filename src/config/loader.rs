//! Configuration loading from disk.
//!
//! The loader parses the file into a JSON tree first so the structural
//! checks (object root, object context entries, string-only NPN arrays)
//! can report their own error kinds before the typed deserialization
//! runs. Unknown keys are ignored; missing scalars fall back to the
//! defaults in [`schema`](super::schema).

use std::fs;
use std::path::Path;

use serde_json::Value;

use crate::config::schema::{Config, DEFAULT_SNI_QUERY, DEFAULT_STAPLING_QUERY};
use crate::error::Error;

/// Load and validate a configuration file.
pub fn load(path: &Path) -> Result<Config, Error> {
    let display = path.display().to_string();
    let raw = fs::read_to_string(path).map_err(|source| Error::ConfigRead {
        path: display.clone(),
        source,
    })?;
    let value: Value = serde_json::from_str(&raw).map_err(|source| Error::JsonParse {
        path: display.clone(),
        source,
    })?;
    from_value(value, &display)
}

/// Build a validated [`Config`] out of a parsed JSON tree.
pub fn from_value(value: Value, origin: &str) -> Result<Config, Error> {
    let root = value.as_object().ok_or(Error::JsonRootNotObject)?;

    if let Some(contexts) = root.get("contexts").and_then(Value::as_array) {
        for (index, entry) in contexts.iter().enumerate() {
            if !entry.is_object() {
                return Err(Error::JsonCtxNotObject { index });
            }
            verify_npn(entry.get("npn"))?;
        }
    }
    if let Some(frontend) = root.get("frontend") {
        verify_npn(frontend.get("npn"))?;
    }

    let mut config: Config =
        serde_json::from_value(value).map_err(|source| Error::JsonParse {
            path: origin.to_string(),
            source,
        })?;

    apply_defaults(&mut config);
    validate(&mut config)?;
    Ok(config)
}

/// Every element of an `npn` array must be a JSON string.
fn verify_npn(npn: Option<&Value>) -> Result<(), Error> {
    let Some(list) = npn.and_then(Value::as_array) else {
        return Ok(());
    };
    if list.iter().all(Value::is_string) {
        Ok(())
    } else {
        Err(Error::NpnNonString)
    }
}

/// Fill the scalars serde's struct-level default cannot express: the
/// helper query templates differ per section, so a present-but-partial
/// `sni`/`stapling` object leaves them empty.
fn apply_defaults(config: &mut Config) {
    if config.sni.query.is_empty() {
        config.sni.query = DEFAULT_SNI_QUERY.to_string();
    }
    if config.stapling.query.is_empty() {
        config.stapling.query = DEFAULT_STAPLING_QUERY.to_string();
    }
}

/// Semantic checks after deserialization. Server names are normalized to
/// lowercase ASCII here, so every later comparison is a plain byte match.
fn validate(config: &mut Config) -> Result<(), Error> {
    verify_npn_lengths(config.frontend.npn.as_deref())?;

    for ctx in &mut config.contexts {
        if ctx.servername.is_empty() || !ctx.servername.is_ascii() {
            return Err(Error::BadServername {
                name: ctx.servername.clone(),
            });
        }
        ctx.servername.make_ascii_lowercase();
        verify_npn_lengths(ctx.npn.as_deref())?;
    }

    for (i, ctx) in config.contexts.iter().enumerate() {
        if config.contexts[..i]
            .iter()
            .any(|prev| prev.servername == ctx.servername)
        {
            return Err(Error::DuplicateServername {
                name: ctx.servername.clone(),
            });
        }
    }

    Ok(())
}

/// Advertised protocol names must fit a one-byte length prefix.
fn verify_npn_lengths(npn: Option<&[String]>) -> Result<(), Error> {
    for name in npn.unwrap_or_default() {
        if name.is_empty() || name.len() > 255 {
            return Err(Error::NpnLength { name: name.clone() });
        }
    }
    Ok(())
}
