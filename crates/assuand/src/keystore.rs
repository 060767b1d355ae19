//! The `keystore` protocol profile

use assuan_config::Settings;
use assuan_ipc::{
    inquire_one, HandlerResult, Profile, ServerChannel, StreamHandler, StreamResult,
};
use assuan_proto::{AssuanError, ErrorCode, ErrorSource};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::debug;

/// Source name reported with keystore errors
pub const SOURCE_NAME: &str = "keystore";

/// Keys accepted by `OPTION`
pub const SUPPORTED_OPTIONS: [&str; 4] = ["ttyname", "lc-ctype", "lc-messages", "display"];

/// Per-connection state
#[derive(Debug, Default)]
pub struct KeystoreState {
    /// Key selected with `SETKEY`
    pub current_key: Option<String>,
    pub values: BTreeMap<String, Vec<u8>>,
    pub options: BTreeMap<String, String>,
}

fn keystore_error(code: ErrorCode, message: &str) -> AssuanError {
    AssuanError::new(ErrorSource::UNKNOWN, code, SOURCE_NAME, message)
}

fn no_key_selected() -> AssuanError {
    keystore_error(ErrorCode::NOT_FOUND, "no key selected")
}

/// Build the profile, taking greeting and `GETINFO` values from `settings`.
pub fn profile(settings: &Settings) -> Profile<KeystoreState> {
    let info = settings.info.clone();

    let mut builder = Profile::builder(KeystoreState::default)
        .data("GETINFO", move |state, what| get_info(&info, state, what))
        .state("SETKEY", set_key)
        .stream("PUTVAL", PutValue)
        .data("GETVAL", get_value)
        .stream("LISTKEYS", ListKeys)
        .plain("ECHO", |text| Ok(text.as_bytes().to_vec()))
        .option_setter(set_option)
        .help(
            "GETINFO",
            [
                "GETINFO <what>",
                "Return pid, version, an option set on this connection",
                "or a value from the info table of the configuration",
            ],
        )
        .help("SETKEY", ["SETKEY <name>", "Select the key PUTVAL and GETVAL work on"])
        .help("PUTVAL", ["PUTVAL", "Store the VALUE inquired from the client"])
        .help("GETVAL", ["GETVAL", "Return the value stored under the selected key"])
        .help("LISTKEYS", ["LISTKEYS", "Send one KEY status line per stored key"])
        .help("ECHO", ["ECHO <text>", "Return the parameters as data"]);

    if let Some(greeting) = &settings.daemon.greeting {
        builder = builder.greeting(greeting.clone());
    }
    builder.build()
}

fn get_info(
    info: &BTreeMap<String, String>,
    state: &mut KeystoreState,
    what: &str,
) -> Result<Vec<u8>, AssuanError> {
    let what = what.trim();
    let value = match what {
        "" => {
            return Err(AssuanError::protocol(
                ErrorCode::ASS_PARAMETER,
                "missing value for WHAT",
            ));
        }
        "pid" => std::process::id().to_string(),
        "version" => env!("CARGO_PKG_VERSION").to_string(),
        _ => match state.options.get(what).or_else(|| info.get(what)) {
            Some(value) => value.clone(),
            None => {
                return Err(AssuanError::protocol(
                    ErrorCode::ASS_PARAMETER,
                    "unknown value for WHAT",
                ));
            }
        },
    };
    Ok(value.into_bytes())
}

fn set_key(state: &mut KeystoreState, name: &str) -> HandlerResult {
    let name = name.trim();
    if name.is_empty() {
        return Err(AssuanError::protocol(
            ErrorCode::ASS_PARAMETER,
            "missing key name",
        ));
    }
    state.current_key = Some(name.to_string());
    Ok(())
}

fn get_value(state: &mut KeystoreState, _params: &str) -> Result<Vec<u8>, AssuanError> {
    let key = state.current_key.as_ref().ok_or_else(no_key_selected)?;
    state
        .values
        .get(key)
        .cloned()
        .ok_or_else(|| keystore_error(ErrorCode::NOT_FOUND, "no value stored"))
}

fn set_option(state: &mut KeystoreState, key: &str, value: &str) -> HandlerResult {
    if !SUPPORTED_OPTIONS.contains(&key) {
        debug!(key, "Unknown option");
        return Err(keystore_error(ErrorCode::UNKNOWN_OPTION, "unknown option"));
    }
    state.options.insert(key.to_string(), value.to_string());
    Ok(())
}

struct PutValue;

#[async_trait]
impl StreamHandler<KeystoreState> for PutValue {
    async fn handle(
        &self,
        channel: &mut ServerChannel,
        state: &mut KeystoreState,
        _params: &str,
    ) -> StreamResult {
        let key = state.current_key.clone().ok_or_else(no_key_selected)?;
        let value = inquire_one(channel, "VALUE").await?;
        debug!(key = %key, len = value.len(), "Value stored");
        state.values.insert(key, value);
        Ok(())
    }
}

struct ListKeys;

#[async_trait]
impl StreamHandler<KeystoreState> for ListKeys {
    async fn handle(
        &self,
        channel: &mut ServerChannel,
        state: &mut KeystoreState,
        _params: &str,
    ) -> StreamResult {
        for key in state.values.keys() {
            channel.write_status("KEY", key).await?;
        }
        Ok(())
    }
}
