// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Reads the YAML accounts document and turns each entry into an
//! [`AccountEntry`]. Document-level problems abort the run; a bad entry only
//! rejects that entry.

use std::fs;
use std::path::PathBuf;

use serde::Deserialize;
use serde_yaml::Value;
use thiserror::Error as ThisError;

use crate::app::types::{AccountEntry, AccountRecord};

pub const DEFAULT_ACCOUNTS_ENV: &str = "CONFIG";
const ACCOUNTS_KEY: &str = "accounts";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AccountSource {
    Env(String),
    File(PathBuf),
}

impl AccountSource {
    pub fn describe(&self) -> String {
        match self {
            AccountSource::Env(name) => format!("environment variable {name}"),
            AccountSource::File(path) => format!("file {}", path.display()),
        }
    }
}

#[derive(Debug, ThisError)]
pub enum AccountsError {
    #[error("environment variable {0} is not set")]
    MissingEnv(String),
    #[error("environment variable {0} is empty")]
    EmptyEnv(String),
    #[error("failed to read accounts file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse accounts document")]
    Parse(#[from] serde_yaml::Error),
    #[error("accounts document has no `{ACCOUNTS_KEY}` key")]
    MissingAccounts,
    #[error("`{ACCOUNTS_KEY}` must be a list")]
    NotAList,
}

#[derive(Debug, Deserialize)]
struct RawAccount {
    username: Option<Value>,
    password: Option<Value>,
    #[serde(alias = "cmd")]
    command: Option<Value>,
    tip: Option<Value>,
}

/// How a YAML scalar may be read back as text.
#[derive(Clone, Copy, PartialEq, Eq)]
enum TextRule {
    /// Only YAML strings; number spellings (`1.50`, `0x1F`, `1e3`) do not
    /// survive the round trip.
    StringOnly,
    /// Strings, booleans and integers that print back exactly.
    Lenient,
}

fn text_field(name: &str, value: Option<Value>, rule: TextRule) -> Result<Option<String>, String> {
    let quoted = || format!("`{name}` must be a quoted string");
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) => Ok(Some(text)),
        Some(Value::Bool(flag)) if rule == TextRule::Lenient => Ok(Some(flag.to_string())),
        Some(Value::Number(number))
            if rule == TextRule::Lenient && (number.is_i64() || number.is_u64()) =>
        {
            Ok(Some(number.to_string()))
        }
        Some(Value::Bool(_)) | Some(Value::Number(_)) => Err(quoted()),
        Some(_) => Err(format!("`{name}` must be a scalar")),
    }
}

fn record_from(raw: RawAccount) -> Result<AccountRecord, String> {
    let username = text_field("username", raw.username, TextRule::Lenient)?;
    let password = text_field("password", raw.password, TextRule::StringOnly)?;
    let command = text_field("command", raw.command, TextRule::Lenient)?;
    let tip = text_field("tip", raw.tip, TextRule::Lenient)?;
    Ok(AccountRecord::new(
        username.as_deref().unwrap_or_default(),
        password.as_deref().unwrap_or_default(),
        command.as_deref(),
        tip.as_deref(),
    ))
}

pub fn load_accounts(source: &AccountSource) -> Result<Vec<AccountEntry>, AccountsError> {
    let text = match source {
        AccountSource::Env(name) => {
            let value =
                std::env::var(name).map_err(|_| AccountsError::MissingEnv(name.clone()))?;
            if value.trim().is_empty() {
                return Err(AccountsError::EmptyEnv(name.clone()));
            }
            value
        }
        AccountSource::File(path) => fs::read_to_string(path).map_err(|source| {
            AccountsError::Read {
                path: path.clone(),
                source,
            }
        })?,
    };
    parse_accounts(&text)
}

pub fn parse_accounts(text: &str) -> Result<Vec<AccountEntry>, AccountsError> {
    let doc: Value = serde_yaml::from_str(text)?;
    let accounts = match doc.get(ACCOUNTS_KEY) {
        None => return Err(AccountsError::MissingAccounts),
        Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Sequence(items)) => items,
        Some(_) => return Err(AccountsError::NotAList),
    };
    Ok(accounts
        .iter()
        .enumerate()
        .map(|(index, item)| parse_entry(index, item))
        .collect())
}

fn parse_entry(index: usize, item: &Value) -> AccountEntry {
    if !item.is_mapping() {
        return AccountEntry::Malformed {
            index,
            reason: "entry is not a mapping".to_string(),
        };
    }
    let parsed = serde_yaml::from_value::<RawAccount>(item.clone())
        .map_err(|err| err.to_string())
        .and_then(record_from);
    match parsed {
        Ok(record) => AccountEntry::Record(record),
        Err(reason) => AccountEntry::Malformed { index, reason },
    }
}
